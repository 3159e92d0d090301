use serde::{Deserialize, Serialize};

use crate::config::TorpedoConfig;
use crate::models::{
    common::{math_utils, OwnerId, Position3D, SubId, TorpedoId},
    submarine::Submarine,
    traits::{IEntity, ISonarTarget},
};

/// 相対旋回指令の残量がこれ未満になったら完了とみなす（rad）
const PENDING_TURN_EPSILON: f64 = 1e-4;

/// 魚雷の誘導モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// 有線誘導中（針路・深度の指令を受け付ける）
    Wire,
    /// 有線切断（以後は直進のみ、元には戻らない）
    Free,
}

/// シーカー（魚雷搭載アクティブソナー）の状態
///
/// 発射時に一度だけ決定し、トグルではなく明示的な設定で変更します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seeker {
    /// シーカー非搭載
    Absent,
    Off,
    On,
}

/// 魚雷の消滅理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorpedoEndReason {
    /// 発射点からの最大航走距離を超えた
    OutOfRange,
    /// 寿命切れ
    Expired,
    /// 起爆した
    Detonated,
}

/// 魚雷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torpedo {
    pub id: TorpedoId,
    pub owner_id: OwnerId,
    pub parent_sub: SubId,
    pub position: Position3D,
    /// 発射点（航走距離の基準）
    pub start_x: f64,
    pub start_y: f64,
    pub target_depth: Option<f64>,
    pub heading: f64,
    pub target_heading: Option<f64>,
    /// 一度きりの相対旋回指令の残量（rad）
    pub pending_turn: Option<f64>,
    pub speed: f64,
    pub created_at: f64,
    pub control_mode: ControlMode,
    pub wire_length: f64,
    pub seeker: Seeker,
    pub seeker_next_at: f64,
    pub revision: u64,
}

impl Torpedo {
    /// 発射管から魚雷を生成
    ///
    /// 艦首前方 `nose_offset_m`、右舷方向に `tube × tube_spacing_m` の位置に出現し、
    /// 母艦の針路で直進を開始します。
    ///
    /// # 引数
    ///
    /// * `id` - 魚雷ID
    /// * `parent` - 発射した潜水艦
    /// * `tube` - 発射管番号（0=中央、負=左舷、正=右舷）
    /// * `wire_length` - 有線長（m）
    /// * `seeker` - シーカー初期状態
    /// * `now` - 発射時刻
    /// * `cfg` - 魚雷設定
    pub fn launch(
        id: TorpedoId,
        parent: &Submarine,
        tube: i32,
        wire_length: f64,
        seeker: Seeker,
        now: f64,
        cfg: &TorpedoConfig,
    ) -> Self {
        let (sin_h, cos_h) = parent.heading.sin_cos();
        let lateral = tube as f64 * cfg.tube_spacing_m;
        let x = parent.position.x + cos_h * cfg.nose_offset_m - sin_h * lateral;
        let y = parent.position.y + sin_h * cfg.nose_offset_m + cos_h * lateral;

        Self {
            id,
            owner_id: parent.owner_id,
            parent_sub: parent.id,
            position: Position3D::new(x, y, parent.position.depth),
            start_x: x,
            start_y: y,
            target_depth: None,
            heading: parent.heading,
            target_heading: None,
            pending_turn: None,
            speed: cfg.speed,
            created_at: now,
            control_mode: ControlMode::Wire,
            wire_length,
            seeker,
            seeker_next_at: now + cfg.seeker.interval_s,
            revision: 0,
        }
    }

    /// 1ティック分の誘導・運動を計算した次状態を返す
    ///
    /// 最大航走距離または寿命を超えた場合は消滅理由を併せて返します。
    /// 近接信管の判定は [`Torpedo::proximity_triggered`] で別途行います。
    pub fn guide(
        &self,
        parent: Option<&Submarine>,
        dt: f64,
        now: f64,
        cfg: &TorpedoConfig,
    ) -> (Torpedo, Option<TorpedoEndReason>) {
        let mut t = self.clone();
        let dt = dt.max(0.0);

        // 有線リンク
        if t.control_mode == ControlMode::Wire {
            let connected = parent
                .map(|p| t.position.distance_xy(&p.position) <= t.wire_length)
                .unwrap_or(false);
            if !connected {
                t.control_mode = ControlMode::Free;
            }
        }

        // 針路
        let max_turn = math_utils::deg_to_rad(cfg.turn_rate_deg_s) * dt;
        if let Some(target_heading) = t.target_heading {
            let step = math_utils::angle_difference(t.heading, target_heading).clamp(-max_turn, max_turn);
            t.heading = math_utils::wrap_angle(t.heading + step);
        } else if let Some(pending) = t.pending_turn {
            let step = pending.clamp(-max_turn, max_turn);
            t.heading = math_utils::wrap_angle(t.heading + step);
            let remainder = pending - step;
            t.pending_turn = (remainder.abs() >= PENDING_TURN_EPSILON).then_some(remainder);
        }

        // 深度
        let mut depth = t.position.depth;
        if let Some(target_depth) = t.target_depth {
            depth = math_utils::step_toward(depth, target_depth, cfg.depth_rate_m_s * dt);
        }
        t.position = Position3D::new(t.position.x, t.position.y, depth).offset(t.heading, t.speed * dt);

        let start = Position3D::new(t.start_x, t.start_y, t.position.depth);
        if t.position.distance_xy(&start) > cfg.max_range {
            return (t, Some(TorpedoEndReason::OutOfRange));
        }
        if now - t.created_at > cfg.lifetime_s {
            return (t, Some(TorpedoEndReason::Expired));
        }

        (t, None)
    }

    /// 信管が作動可能か（発射後の安全時間を経過したか）
    pub fn is_armed(&self, now: f64, cfg: &TorpedoConfig) -> bool {
        cfg.proximity_fuze_m > 0.0 && now - self.created_at >= cfg.arming_delay_s
    }

    /// 近接信管の判定
    ///
    /// 作動可能で、生存中の目標が3次元距離で信管半径以内にあれば true を返します。
    pub fn proximity_triggered<'a, T, I>(&self, targets: I, now: f64, cfg: &TorpedoConfig) -> bool
    where
        T: ISonarTarget + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        self.is_armed(now, cfg)
            && targets
                .into_iter()
                .any(|s| s.is_alive() && self.position.distance_3d(&s.get_position()) <= cfg.proximity_fuze_m)
    }

    /// シーカー探信の時刻に達したか
    pub fn seeker_due(&self, now: f64) -> bool {
        self.seeker == Seeker::On && now >= self.seeker_next_at
    }

    /// 有線誘導中かどうか
    pub fn is_wired(&self) -> bool {
        self.control_mode == ControlMode::Wire
    }

    /// 所有者向けの公開ビュー
    pub fn view(&self) -> TorpedoView {
        TorpedoView {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            depth: self.position.depth,
            heading: self.heading,
            speed: self.speed,
            mode: self.control_mode,
            wire_length: self.wire_length,
            target_depth: self.target_depth,
            target_heading: self.target_heading,
            seeker: self.seeker,
        }
    }
}

impl IEntity for Torpedo {
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

/// 魚雷の公開ビュー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorpedoView {
    pub id: TorpedoId,
    pub x: f64,
    pub y: f64,
    pub depth: f64,
    pub heading: f64,
    pub speed: f64,
    pub mode: ControlMode,
    pub wire_length: f64,
    pub target_depth: Option<f64>,
    pub target_heading: Option<f64>,
    pub seeker: Seeker,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubmarineConfig;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use uuid::Uuid;

    const DT: f64 = 0.1;

    fn parent_at(x: f64, y: f64, heading: f64) -> Submarine {
        Submarine::spawn(Uuid::from_u128(1), 7, Position3D::new(x, y, 100.0), heading, 60.0, 0.0, &SubmarineConfig::default())
    }

    fn launched(parent: &Submarine, wire: f64) -> Torpedo {
        Torpedo::launch(Uuid::from_u128(2), parent, 0, wire, Seeker::Off, 0.0, &TorpedoConfig::default())
    }

    #[test]
    fn test_launch_geometry() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(100.0, 200.0, 0.0);
        let center = launched(&parent, 600.0);
        assert_relative_eq!(center.position.x, 112.0);
        assert_relative_eq!(center.position.y, 200.0);

        let starboard = Torpedo::launch(Uuid::from_u128(3), &parent, 2, 600.0, Seeker::Absent, 0.0, &cfg);
        assert_relative_eq!(starboard.position.x, 112.0);
        assert_relative_eq!(starboard.position.y, 204.0);
        assert_eq!(starboard.owner_id, parent.owner_id);
        assert_eq!(starboard.control_mode, ControlMode::Wire);
    }

    #[test]
    fn test_wire_breaks_exactly_once_and_never_reverts() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, 0.0);
        let mut t = launched(&parent, 100.0);
        let mut transitions = 0;
        let mut was_wired = true;
        for i in 0..200 {
            let now = i as f64 * DT;
            let distance_before = t.position.distance_xy(&parent.position);
            let (next, end) = t.guide(Some(&parent), DT, now, &cfg);
            assert!(end.is_none());
            if was_wired && !next.is_wired() {
                transitions += 1;
                assert!(distance_before > 100.0);
            }
            if next.is_wired() {
                assert!(was_wired);
                assert!(distance_before <= 100.0);
            }
            was_wired = next.is_wired();
            t = next;
        }
        assert_eq!(transitions, 1);

        // 母艦に戻っても有線には戻らない
        t.position = parent.position;
        let (next, _) = t.guide(Some(&parent), DT, 20.0, &cfg);
        assert_eq!(next.control_mode, ControlMode::Free);
    }

    #[test]
    fn test_missing_parent_frees_wire() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, 0.0);
        let t = launched(&parent, 600.0);
        let (next, _) = t.guide(None, DT, 0.1, &cfg);
        assert_eq!(next.control_mode, ControlMode::Free);
    }

    #[test]
    fn test_target_heading_turns_short_way_with_cap() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, math_utils::deg_to_rad(170.0));
        let mut t = launched(&parent, 600.0);
        t.target_heading = Some(math_utils::deg_to_rad(-170.0));
        let (next, _) = t.guide(Some(&parent), DT, 0.1, &cfg);
        // 30°/s × 0.1s = 3° を正方向へ（近回り）
        assert_relative_eq!(next.heading, math_utils::deg_to_rad(173.0), epsilon = 1e-9);
    }

    #[test]
    fn test_pending_turn_consumes_itself() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, 0.0);
        let mut t = launched(&parent, 600.0);
        t.pending_turn = Some(FRAC_PI_2);
        let mut ticks = 0;
        while t.pending_turn.is_some() {
            t = t.guide(Some(&parent), DT, ticks as f64 * DT, &cfg).0;
            ticks += 1;
            assert!(ticks < 100);
        }
        // 90° / 3°毎ティック
        assert_eq!(ticks, 30);
        assert_relative_eq!(t.heading, FRAC_PI_2, epsilon = 1e-3);
    }

    #[test]
    fn test_depth_tracks_target_at_rate() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, 0.0);
        let mut t = launched(&parent, 600.0);
        t.target_depth = Some(50.0);
        let (next, _) = t.guide(Some(&parent), 1.0, 1.0, &cfg);
        assert_relative_eq!(next.position.depth, 94.0);
    }

    #[test]
    fn test_range_cutoff_and_lifetime() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, 0.0);
        let mut t = launched(&parent, 600.0);
        t.position.x = t.start_x + cfg.max_range - 0.5;
        let (_, end) = t.guide(None, DT, 1.0, &cfg);
        assert_eq!(end, Some(TorpedoEndReason::OutOfRange));

        let t = launched(&parent, 600.0);
        let (_, end) = t.guide(None, DT, cfg.lifetime_s + 1.0, &cfg);
        assert_eq!(end, Some(TorpedoEndReason::Expired));
    }

    #[test]
    fn test_proximity_fuze_respects_arming_delay() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, 0.0);
        let t = launched(&parent, 600.0);
        let mut victim = parent_at(t.position.x + 10.0, t.position.y, 0.0);
        victim.id = Uuid::from_u128(9);

        assert!(!t.proximity_triggered([&victim], 0.5, &cfg));
        assert!(t.proximity_triggered([&victim], 1.0, &cfg));

        victim.health = 0.0;
        assert!(!t.proximity_triggered([&victim], 2.0, &cfg));
    }

    #[test]
    fn test_seeker_due_only_when_on() {
        let cfg = TorpedoConfig::default();
        let parent = parent_at(0.0, 0.0, 0.0);
        let mut t = launched(&parent, 600.0);
        assert!(!t.seeker_due(10.0));
        t.seeker = Seeker::On;
        assert!(!t.seeker_due(cfg.seeker.interval_s - 0.1));
        assert!(t.seeker_due(cfg.seeker.interval_s));
    }
}
