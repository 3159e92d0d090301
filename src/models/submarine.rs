use serde::{Deserialize, Serialize};

use crate::config::SubmarineConfig;
use crate::models::{
    common::{math_utils, OwnerId, Position3D, SubId},
    traits::{IEntity, ISonarTarget},
};

/// 最大値（バッテリー・ブローチャージ・耐久値の共通スケール）
pub const FULL: f64 = 100.0;

/// 潜水艦（プレイヤーが操艦するビークル）
///
/// すべてのフィールドは生成時に初期化され、実行中に欠落することはありません。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submarine {
    pub id: SubId,
    pub owner_id: OwnerId,
    pub position: Position3D,
    /// 針路（rad、東=0、反時計回り正）
    pub heading: f64,
    /// ピッチ（rad、艦首上げ正）
    pub pitch: f64,
    /// 舵のサーボ実角度（rad）
    pub rudder_angle: f64,
    /// 正規化された舵指令（-1..1）
    pub rudder_cmd: f64,
    /// 潜舵指令（-1..1）
    pub planes: f64,
    /// スロットル（0..1）
    pub throttle: f64,
    /// 深度保持の目標深度（m）
    pub target_depth: Option<f64>,
    pub speed: f64,
    pub battery: f64,
    pub is_snorkeling: bool,
    pub blow_active: bool,
    pub blow_charge: f64,
    pub blow_end: f64,
    pub health: f64,
    /// 最後にパッシブ報告を行った時刻
    pub last_report: f64,
    /// 次にアクティブピン可能になる時刻
    pub ping_ready_at: f64,
    pub created_at: f64,
    pub revision: u64,
}

impl Submarine {
    /// 新しい潜水艦を作成
    ///
    /// # 引数
    ///
    /// * `id` - 潜水艦ID
    /// * `owner_id` - 所有者ID
    /// * `position` - 出現位置
    /// * `heading` - 初期針路（rad）
    /// * `battery` - 初期バッテリー残量
    /// * `now` - 生成時刻
    /// * `cfg` - 潜水艦設定
    pub fn spawn(
        id: SubId,
        owner_id: OwnerId,
        position: Position3D,
        heading: f64,
        battery: f64,
        now: f64,
        cfg: &SubmarineConfig,
    ) -> Self {
        Self {
            id,
            owner_id,
            position,
            heading: math_utils::wrap_angle(heading),
            pitch: 0.0,
            rudder_angle: 0.0,
            rudder_cmd: 0.0,
            planes: 0.0,
            throttle: cfg.initial_throttle,
            target_depth: None,
            speed: 0.0,
            battery: battery.clamp(0.0, FULL),
            is_snorkeling: false,
            blow_active: false,
            blow_charge: FULL,
            blow_end: 0.0,
            health: FULL,
            last_report: now,
            ping_ready_at: now,
            created_at: now,
            revision: 0,
        }
    }

    /// 1ティック分の運動・電力・損傷を積分した次状態を返す
    ///
    /// 純粋関数であり、自身は変更しません。
    pub fn integrate(&self, dt: f64, now: f64, cfg: &SubmarineConfig) -> Submarine {
        let mut s = self.clone();
        let dt = dt.max(0.0);

        let max_rudder = math_utils::deg_to_rad(cfg.max_rudder_deg);
        let rudder_step = math_utils::deg_to_rad(cfg.rudder_rate_deg_s) * dt;
        let yaw_rate = math_utils::deg_to_rad(cfg.yaw_rate_deg_s);
        let pitch_step = math_utils::deg_to_rad(cfg.pitch_rate_deg_s) * dt;

        // 舵サーボ
        s.rudder_cmd = s.rudder_cmd.clamp(-1.0, 1.0);
        let rudder_target = s.rudder_cmd * max_rudder;
        s.rudder_angle = math_utils::step_toward(s.rudder_angle, rudder_target, rudder_step)
            .clamp(-max_rudder, max_rudder);

        // 針路
        let rudder_frac = if max_rudder > 0.0 { s.rudder_angle / max_rudder } else { 0.0 };
        s.heading = math_utils::wrap_angle(s.heading + yaw_rate * rudder_frac * dt);

        // 潜舵 → ピッチ
        let planes_pitch = (s.planes * cfg.planes_effect).clamp(-1.0, 1.0)
            * math_utils::deg_to_rad(cfg.max_pitch_deg);
        s.pitch = math_utils::step_toward(s.pitch, planes_pitch, pitch_step);

        // 速力（慣性なし）
        s.speed = s.throttle.clamp(0.0, 1.0) * cfg.max_speed;

        // 鉛直速度（正=沈降）
        let mut v_down = cfg.neutral_bias * (1.0 - s.throttle);

        let blow = &cfg.emergency_blow;
        if s.blow_active && now < s.blow_end && s.blow_charge > 0.0 {
            v_down -= blow.upward_mps;
            s.blow_charge = (s.blow_charge - FULL * dt / blow.duration_s).clamp(0.0, FULL);
        } else {
            s.blow_active = false;
        }

        let ap = &cfg.autopilot;
        if let Some(target_depth) = s.target_depth {
            if s.planes.abs() < ap.planes_deadband {
                let err = target_depth - s.position.depth;
                let max_ap_pitch = math_utils::deg_to_rad(ap.max_pitch_deg);
                let ap_pitch = (-err * math_utils::deg_to_rad(ap.pitch_gain_deg_per_m))
                    .clamp(-max_ap_pitch, max_ap_pitch);
                s.pitch = math_utils::step_toward(s.pitch, ap_pitch, pitch_step);
                v_down += (err * ap.vertical_gain).clamp(-ap.max_vertical_mps, ap.max_vertical_mps);
            }
        }

        // 揚力（艦首上げで浮上）
        v_down -= s.pitch.sin() * s.speed.max(0.0) * cfg.lift_coefficient;

        let depth = s.position.depth + v_down * dt;
        s.position = Position3D::new(s.position.x, s.position.y, depth).offset(s.heading, s.speed * dt);

        // バッテリーとシュノーケル
        let battery = &cfg.battery;
        s.battery = (s.battery - s.throttle * battery.drain_per_throttle_per_s * dt).clamp(0.0, FULL);
        if s.is_snorkeling {
            if s.position.depth <= cfg.snorkel_depth {
                s.battery = (s.battery + battery.recharge_per_s_snorkel * dt).clamp(0.0, FULL);
                s.blow_charge = (s.blow_charge + blow.recharge_per_s_at_snorkel * dt).clamp(0.0, FULL);
            } else if s.position.depth > cfg.snorkel_depth + cfg.snorkel_hysteresis_m {
                s.is_snorkeling = false;
            }
        }

        if s.battery <= 0.0 {
            s.throttle = s.throttle.min(battery.empty_throttle_cap);
        }

        // 圧壊ダメージ
        if s.position.depth > cfg.crush_depth {
            let over = s.position.depth - cfg.crush_depth;
            s.health = (s.health - over / 100.0 * cfg.crush_dps_per_100m * dt).max(0.0);
        }

        s
    }

    /// 所有者向けの公開ビュー
    pub fn view(&self) -> SubmarineView {
        SubmarineView {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            depth: self.position.depth,
            heading: self.heading,
            pitch: self.pitch,
            rudder_angle: self.rudder_angle,
            rudder_cmd: self.rudder_cmd,
            planes: self.planes,
            speed: self.speed,
            battery: self.battery,
            is_snorkeling: self.is_snorkeling,
            blow_active: self.blow_active,
            blow_charge: self.blow_charge,
            health: self.health,
            target_depth: self.target_depth,
            throttle: self.throttle,
        }
    }
}

impl IEntity for Submarine {
    fn get_id(&self) -> uuid::Uuid {
        self.id
    }

    fn get_owner(&self) -> OwnerId {
        self.owner_id
    }

    fn get_position(&self) -> Position3D {
        self.position
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

impl ISonarTarget for Submarine {
    fn radiated_speed(&self) -> f64 {
        self.speed
    }

    fn is_snorkeling(&self) -> bool {
        self.is_snorkeling
    }

    fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// 潜水艦の公開ビュー（状態読み出し・スナップショット用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmarineView {
    pub id: SubId,
    pub x: f64,
    pub y: f64,
    pub depth: f64,
    pub heading: f64,
    pub pitch: f64,
    pub rudder_angle: f64,
    pub rudder_cmd: f64,
    pub planes: f64,
    pub speed: f64,
    pub battery: f64,
    pub is_snorkeling: bool,
    pub blow_active: bool,
    pub blow_charge: f64,
    pub health: f64,
    pub target_depth: Option<f64>,
    pub throttle: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::f64::consts::PI;
    use uuid::Uuid;

    const DT: f64 = 0.1;

    fn test_sub(depth: f64) -> Submarine {
        let cfg = SubmarineConfig::default();
        Submarine::spawn(Uuid::nil(), 1, Position3D::new(0.0, 0.0, depth), 0.0, 60.0, 0.0, &cfg)
    }

    fn run(mut s: Submarine, ticks: usize, cfg: &SubmarineConfig) -> Submarine {
        for i in 0..ticks {
            s = s.integrate(DT, i as f64 * DT, cfg);
        }
        s
    }

    #[test]
    fn test_full_throttle_reaches_max_speed_in_one_tick() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(100.0);
        s.throttle = 1.0;
        let next = s.integrate(DT, 0.0, &cfg);
        assert_relative_eq!(next.speed, cfg.max_speed);
        assert_relative_eq!(next.position.x, cfg.max_speed * DT, epsilon = 1e-9);
    }

    #[test]
    fn test_rudder_never_exceeds_hardware_limit() {
        let cfg = SubmarineConfig::default();
        let limit = math_utils::deg_to_rad(cfg.max_rudder_deg);
        let mut s = test_sub(100.0);
        for i in 0..500 {
            s.rudder_cmd = if (i / 50) % 2 == 0 { 1.0 } else { -1.0 };
            s = s.integrate(DT, i as f64 * DT, &cfg);
            assert!(s.rudder_angle.abs() <= limit + 1e-12);
        }
    }

    #[test]
    fn test_rudder_servo_is_rate_limited() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(100.0);
        s.rudder_cmd = 1.0;
        let next = s.integrate(DT, 0.0, &cfg);
        assert_relative_eq!(next.rudder_angle, math_utils::deg_to_rad(6.0), epsilon = 1e-12);
        assert!(next.heading > 0.0);
    }

    #[test]
    fn test_idle_boat_sinks_monotonically_until_crush() {
        let mut cfg = SubmarineConfig::default();
        // 短時間で圧壊深度に届くよう沈降を速める
        cfg.neutral_bias = 20.0;
        let mut s = test_sub(450.0);
        s.throttle = 0.0;
        let mut prev_depth = s.position.depth;
        let mut damaged = false;
        for i in 0..100 {
            s = s.integrate(DT, i as f64 * DT, &cfg);
            assert!(s.position.depth > prev_depth);
            assert!(s.position.depth - prev_depth <= cfg.neutral_bias * DT + 1e-9);
            prev_depth = s.position.depth;
            if s.position.depth <= cfg.crush_depth {
                assert_eq!(s.health, FULL);
            } else if s.health < FULL {
                damaged = true;
            }
        }
        assert!(damaged);
    }

    #[test]
    fn test_default_neutral_bias_sinks() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(100.0);
        s.throttle = 0.0;
        let next = run(s.clone(), 10, &cfg);
        assert_relative_eq!(next.position.depth, 100.0 + cfg.neutral_bias * 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_snorkel_recharges_and_disengages_when_deep() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(10.0);
        s.throttle = 0.0;
        s.is_snorkeling = true;
        s.blow_charge = 50.0;
        let before = s.battery;
        let next = s.integrate(1.0, 0.0, &cfg);
        assert!(next.battery > before);
        assert_relative_eq!(next.blow_charge, 56.0, epsilon = 1e-9);
        assert!(next.is_snorkeling);

        let mut deep = test_sub(30.0);
        deep.is_snorkeling = true;
        let next = deep.integrate(DT, 0.0, &cfg);
        assert!(!next.is_snorkeling);
    }

    #[test]
    fn test_snorkel_hysteresis_band_holds_without_charging() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(16.0);
        s.throttle = 0.0;
        s.is_snorkeling = true;
        let next = s.integrate(DT, 0.0, &cfg);
        assert!(next.is_snorkeling);
        assert!(next.battery <= s.battery);
    }

    #[test]
    fn test_emergency_blow_rises_and_drains_charge() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(100.0);
        s.throttle = 0.0;
        s.blow_active = true;
        s.blow_end = 10.0;
        let next = s.integrate(1.0, 0.0, &cfg);
        assert!(next.position.depth < 100.0);
        assert_relative_eq!(next.blow_charge, 90.0, epsilon = 1e-9);

        // 期限切れで停止
        let expired = next.integrate(DT, 11.0, &cfg);
        assert!(!expired.blow_active);
    }

    #[test]
    fn test_autopilot_approaches_target_depth() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(100.0);
        s.throttle = 0.5;
        s.target_depth = Some(150.0);
        let after = run(s, 1200, &cfg);
        assert!((after.position.depth - 150.0).abs() < 5.0);
    }

    #[test]
    fn test_manual_planes_disable_autopilot() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(100.0);
        s.throttle = 0.0;
        s.planes = 0.5;
        s.target_depth = Some(300.0);
        let next = s.integrate(DT, 0.0, &cfg);
        assert!(next.position.depth - 100.0 < 0.01);
    }

    #[test]
    fn test_empty_battery_caps_throttle() {
        let cfg = SubmarineConfig::default();
        let mut s = test_sub(100.0);
        s.battery = 0.0;
        s.throttle = 1.0;
        let next = s.integrate(DT, 0.0, &cfg);
        assert_eq!(next.battery, 0.0);
        assert_relative_eq!(next.throttle, cfg.battery.empty_throttle_cap);
    }

    proptest! {
        #[test]
        fn prop_state_stays_within_bounds(
            throttle in 0.0f64..=1.0,
            planes in -1.0f64..=1.0,
            rudder in -1.0f64..=1.0,
            depth in 0.0f64..700.0,
            heading in -PI..PI,
            battery in 0.0f64..=100.0,
            snorkel in any::<bool>(),
            target in proptest::option::of(0.0f64..600.0),
            ticks in 1usize..200,
        ) {
            let cfg = SubmarineConfig::default();
            let mut s = Submarine::spawn(Uuid::nil(), 1, Position3D::new(0.0, 0.0, depth), heading, battery, 0.0, &cfg);
            s.throttle = throttle;
            s.planes = planes;
            s.rudder_cmd = rudder;
            s.is_snorkeling = snorkel;
            s.target_depth = target;
            s.blow_active = true;
            s.blow_end = 5.0;
            let limit = math_utils::deg_to_rad(cfg.max_rudder_deg);
            for i in 0..ticks {
                s = s.integrate(DT, i as f64 * DT, &cfg);
                prop_assert!((0.0..=FULL).contains(&s.battery));
                prop_assert!((0.0..=FULL).contains(&s.health));
                prop_assert!((0.0..=FULL).contains(&s.blow_charge));
                prop_assert!(s.position.depth >= 0.0);
                prop_assert!(s.heading > -PI && s.heading <= PI);
                prop_assert!(s.rudder_angle.abs() <= limit + 1e-12);
            }
        }
    }
}
