//! # Commands モジュール
//!
//! 認証済みの所有者から届くプレイヤーコマンドを処理します。
//!
//! すべてのコマンドは以下の規則に従います。
//!
//! - ワールドのロックは1回の読み取り・変更・書き込みの間だけ保持する
//! - 検証はすべて変更の前に行い、拒否時は状態を一切変更しない
//! - 変更したレコードは改訂番号を進める（ティックのコミット時の競合解決に使用）
//! - 生成されたイベントはロック解放後に配信する

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{GameConfig, SubmarineConfig};
use crate::error::CommandError;
use crate::events::{AdminState, AdminSubmarineView, AdminTorpedoView, GameEvent, OwnerState, PendingBroadcasts};
use crate::models::{
    explosion, math_utils, sonar, IEntity, OwnerId, PingBeam, Position3D, Seeker, SubId, Submarine, Torpedo,
    TorpedoId,
};
use crate::simulation::SimulationEngine;

/// 目標深度の指令（変更なし / 解除 / 設定）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DepthOrder {
    #[default]
    Keep,
    Clear,
    Set(f64),
}

/// 操艦入力
///
/// `None` の項目は変更しません。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlInput {
    pub throttle: Option<f64>,
    pub target_depth: DepthOrder,
    pub planes: Option<f64>,
    /// 舵角指令（度、正=左舷=反時計回り）
    pub rudder_deg: Option<f64>,
    /// 現在の舵角指令からの増分（度）
    pub rudder_nudge_deg: Option<f64>,
}

/// 魚雷発射指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchOrder {
    /// 発射管番号（0=中央、負=左舷、正=右舷）
    pub tube: i32,
    /// 有線長（未指定で既定値）
    pub wire_length: Option<f64>,
    pub seeker: Seeker,
}

impl Default for LaunchOrder {
    fn default() -> Self {
        Self {
            tube: 0,
            wire_length: None,
            seeker: Seeker::Off,
        }
    }
}

/// 魚雷の針路指令（度）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadingOrder {
    /// 絶対針路へ旋回
    Absolute(f64),
    /// 現在針路からの一度きりの相対旋回
    Relative(f64),
}

/// アクティブピン指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingOrder {
    pub beam_deg: f64,
    /// 最大距離（未指定で設定上限）
    pub max_range: Option<f64>,
    /// 艦首からのビーム中心方位（度）
    pub center_bearing_deg: f64,
}

impl Default for PingOrder {
    fn default() -> Self {
        Self {
            beam_deg: 20.0,
            max_range: None,
            center_bearing_deg: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpawnReceipt {
    pub sub_id: SubId,
    pub x: f64,
    pub y: f64,
    pub depth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchReceipt {
    pub torpedo_id: TorpedoId,
    pub tube: i32,
    pub wire_length: f64,
    pub x: f64,
    pub y: f64,
    pub depth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingReceipt {
    pub battery_cost: f64,
    pub battery_remaining: f64,
    pub echoes_scheduled: usize,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> CommandError {
    CommandError::InvalidParameter {
        field,
        reason: reason.into(),
    }
}

fn finite_opt(field: &'static str, value: Option<f64>) -> Result<Option<f64>, CommandError> {
    value.map(|v| CommandError::require_finite(field, v)).transpose()
}

/// 操艦入力を潜水艦へ適用
///
/// すべての値を検証してから変更するため、エラー時は何も変わりません。
pub(crate) fn apply_controls(sub: &mut Submarine, input: &ControlInput, cfg: &SubmarineConfig) -> Result<(), CommandError> {
    let throttle = finite_opt("throttle", input.throttle)?;
    let planes = finite_opt("planes", input.planes)?;
    let rudder_deg = finite_opt("rudder_deg", input.rudder_deg)?;
    let rudder_nudge_deg = finite_opt("rudder_nudge_deg", input.rudder_nudge_deg)?;
    let target_depth = match input.target_depth {
        DepthOrder::Set(depth) => DepthOrder::Set(CommandError::require_finite("target_depth", depth)?.max(0.0)),
        other => other,
    };

    match target_depth {
        DepthOrder::Keep => {}
        DepthOrder::Clear => sub.target_depth = None,
        DepthOrder::Set(depth) => sub.target_depth = Some(depth),
    }
    if let Some(throttle) = throttle {
        sub.throttle = throttle.clamp(0.0, 1.0);
    }
    if let Some(planes) = planes {
        sub.planes = planes.clamp(-1.0, 1.0);
    }

    let max_rudder = cfg.max_rudder_deg;
    if let Some(deg) = rudder_deg {
        sub.rudder_cmd = deg.clamp(-max_rudder, max_rudder) / max_rudder;
    }
    if let Some(nudge) = rudder_nudge_deg {
        let current = sub.rudder_cmd * max_rudder;
        sub.rudder_cmd = (current + nudge).clamp(-max_rudder, max_rudder) / max_rudder;
    }

    sub.touch();
    Ok(())
}

impl SimulationEngine {
    /// 新しい潜水艦を出現させる
    pub fn spawn_submarine(&self, owner: OwnerId) -> Result<SpawnReceipt, CommandError> {
        let cfg = self.config();
        let now = self.now();
        let mut world = self.lock_world();

        let (x, y) = world.find_spawn_position(&cfg.world);
        let [depth_min, depth_max] = cfg.world.spawn_depth_m;
        let rng = world.rng_mut();
        let depth = rng.gen_range(depth_min..=depth_max);
        let heading = rng.gen_range(-std::f64::consts::PI..=std::f64::consts::PI);
        let battery = rng.gen_range(cfg.sub.battery.initial_min..=cfg.sub.battery.initial_max);
        let id = world.next_id();

        let sub = Submarine::spawn(id, owner, Position3D::new(x, y, depth), heading, battery, now, &cfg.sub);
        world.insert_sub(sub);
        drop(world);

        info!(owner, sub_id = %id, x, y, depth, "SUB_SPAWNED: 潜水艦出現");
        Ok(SpawnReceipt { sub_id: id, x, y, depth })
    }

    /// 操艦入力を設定
    pub fn set_controls(&self, owner: OwnerId, sub_id: SubId, input: ControlInput) -> Result<(), CommandError> {
        let cfg = self.config();
        let mut world = self.lock_world();
        let sub = world.owned_sub_mut(owner, sub_id)?;
        apply_controls(sub, &input, &cfg.sub)?;
        debug!(owner, sub_id = %sub_id, throttle = sub.throttle, rudder_cmd = sub.rudder_cmd, "操艦入力");
        Ok(())
    }

    /// シュノーケルの上げ下げ
    ///
    /// # 戻り値
    ///
    /// 設定後のシュノーケル状態
    pub fn set_snorkel(&self, owner: OwnerId, sub_id: SubId, on: bool) -> Result<bool, CommandError> {
        let limit = self.config().sub.snorkel_depth;
        let mut world = self.lock_world();
        let sub = world.owned_sub_mut(owner, sub_id)?;
        if on && sub.position.depth > limit {
            return Err(CommandError::TooDeepToSnorkel {
                depth: sub.position.depth,
                limit,
            });
        }
        sub.is_snorkeling = on;
        sub.touch();
        Ok(on)
    }

    /// 緊急ブロー
    ///
    /// # 戻り値
    ///
    /// ブロー終了時刻
    pub fn emergency_blow(&self, owner: OwnerId, sub_id: SubId) -> Result<f64, CommandError> {
        let duration = self.config().sub.emergency_blow.duration_s;
        let now = self.now();
        let mut world = self.lock_world();
        let sub = world.owned_sub_mut(owner, sub_id)?;
        if sub.blow_charge <= 0.0 {
            return Err(CommandError::NoBlowCharge);
        }
        sub.blow_active = true;
        sub.blow_end = now + duration;
        sub.touch();
        info!(owner, sub_id = %sub_id, blow_end = sub.blow_end, "EMERGENCY_BLOW: 緊急ブロー開始");
        Ok(sub.blow_end)
    }

    /// 魚雷発射
    pub fn launch_torpedo(&self, owner: OwnerId, sub_id: SubId, order: LaunchOrder) -> Result<LaunchReceipt, CommandError> {
        let cfg = &self.config().torpedo;
        let max = cfg.max_tube_index;
        if order.tube.unsigned_abs() > max.unsigned_abs() {
            return Err(CommandError::InvalidTube { tube: order.tube, max });
        }
        let wire_length = CommandError::require_finite("wire_length", order.wire_length.unwrap_or(cfg.default_wire))?;
        if wire_length < 0.0 {
            return Err(invalid("wire_length", "must not be negative"));
        }

        let now = self.now();
        let mut world = self.lock_world();
        let parent = world.owned_sub(owner, sub_id)?.clone();
        let id = world.next_id();
        let torpedo = Torpedo::launch(id, &parent, order.tube, wire_length, order.seeker, now, cfg);
        let receipt = LaunchReceipt {
            torpedo_id: id,
            tube: order.tube,
            wire_length,
            x: torpedo.position.x,
            y: torpedo.position.y,
            depth: torpedo.position.depth,
        };
        world.insert_torpedo(torpedo);
        drop(world);

        info!(owner, sub_id = %sub_id, torpedo_id = %id, tube = order.tube, wire_length, "TORPEDO_LAUNCHED: 魚雷発射");
        Ok(receipt)
    }

    /// 有線誘導中の魚雷を取得（切断済みなら wire_lost）
    fn wired_torpedo<'a>(
        world: &'a mut crate::world::WorldStore,
        owner: OwnerId,
        torpedo_id: TorpedoId,
    ) -> Result<&'a mut Torpedo, CommandError> {
        let torpedo = world.owned_torpedo_mut(owner, torpedo_id)?;
        if !torpedo.is_wired() {
            return Err(CommandError::WireLost { torpedo_id });
        }
        Ok(torpedo)
    }

    /// 魚雷の目標深度を設定
    pub fn set_torpedo_depth(&self, owner: OwnerId, torpedo_id: TorpedoId, depth: f64) -> Result<f64, CommandError> {
        let depth = CommandError::require_finite("depth", depth)?.max(0.0);
        let mut world = self.lock_world();
        let torpedo = Self::wired_torpedo(&mut world, owner, torpedo_id)?;
        torpedo.target_depth = Some(depth);
        torpedo.touch();
        Ok(depth)
    }

    /// 魚雷の針路指令
    ///
    /// 絶対指令は目標針路を設定して相対指令を取り消し、
    /// 相対指令は目標針路を取り消して一度きりの旋回量を設定します。
    pub fn set_torpedo_heading(&self, owner: OwnerId, torpedo_id: TorpedoId, order: HeadingOrder) -> Result<(), CommandError> {
        let order = match order {
            HeadingOrder::Absolute(deg) => HeadingOrder::Absolute(CommandError::require_finite("heading_deg", deg)?),
            HeadingOrder::Relative(deg) => HeadingOrder::Relative(CommandError::require_finite("turn_deg", deg)?),
        };
        let mut world = self.lock_world();
        let torpedo = Self::wired_torpedo(&mut world, owner, torpedo_id)?;
        match order {
            HeadingOrder::Absolute(deg) => {
                torpedo.target_heading = Some(math_utils::wrap_angle(math_utils::deg_to_rad(deg)));
                torpedo.pending_turn = None;
            }
            HeadingOrder::Relative(deg) => {
                torpedo.target_heading = None;
                torpedo.pending_turn = Some(math_utils::deg_to_rad(deg));
            }
        }
        torpedo.touch();
        Ok(())
    }

    /// 魚雷シーカーのオン・オフ（トグルではなく設定）
    ///
    /// # 戻り値
    ///
    /// 設定後のシーカー状態
    pub fn set_torpedo_seeker(&self, owner: OwnerId, torpedo_id: TorpedoId, on: bool) -> Result<Seeker, CommandError> {
        let now = self.now();
        let mut world = self.lock_world();
        let torpedo = Self::wired_torpedo(&mut world, owner, torpedo_id)?;
        if torpedo.seeker == Seeker::Absent {
            return Err(invalid("seeker", "torpedo was launched without a seeker"));
        }
        let next = if on { Seeker::On } else { Seeker::Off };
        if torpedo.seeker != next {
            torpedo.seeker = next;
            if next == Seeker::On {
                torpedo.seeker_next_at = now;
            }
            torpedo.touch();
        }
        Ok(next)
    }

    /// アクティブピン
    ///
    /// 電力と冷却時間を検証した後、バッテリーを消費して反響を予約し、
    /// ロック解放後に周囲の他所有者へピン聴知を通知します。
    pub fn ping(&self, owner: OwnerId, sub_id: SubId, order: PingOrder) -> Result<PingReceipt, CommandError> {
        let cfg = self.config();
        let beam_deg = CommandError::require_finite("beam_deg", order.beam_deg)?;
        if beam_deg <= 0.0 || beam_deg > 360.0 {
            return Err(invalid("beam_deg", "must lie within (0, 360]"));
        }
        let max_range = CommandError::require_finite("max_range", order.max_range.unwrap_or(cfg.sonar.active.max_range))?;
        if max_range <= 0.0 {
            return Err(invalid("max_range", "must be positive"));
        }
        let center_deg = CommandError::require_finite("center_bearing_deg", order.center_bearing_deg)?;

        let power = &cfg.sonar.active_power;
        let cost = power.cost_per_ping + beam_deg * power.cost_per_degree;
        let now = self.now();

        let mut pending = PendingBroadcasts::default();
        let mut world = self.lock_world();
        let pinger = world.owned_sub(owner, sub_id)?;
        if pinger.battery < power.min_battery {
            return Err(CommandError::BatteryTooLow {
                battery: pinger.battery,
                minimum: power.min_battery,
            });
        }
        if pinger.battery < cost {
            return Err(CommandError::InsufficientBattery {
                battery: pinger.battery,
                cost,
            });
        }
        if now < pinger.ping_ready_at {
            return Err(CommandError::PingRecharging {
                ready_in_s: pinger.ping_ready_at - now,
            });
        }

        let beam = PingBeam {
            center_bearing: math_utils::wrap_angle(pinger.heading + math_utils::deg_to_rad(center_deg)),
            beam_deg,
            max_range,
        };
        let echoes = sonar::schedule_ping(pinger, world.subs(), beam, now, &cfg.sonar);
        pending.extend_with(
            sonar::ping_exposure(pinger, world.subs(), beam_deg, now, &cfg.sonar),
            GameEvent::ActivePingDetected,
        );
        let echoes_scheduled = echoes.len();
        world.push_echoes(echoes);

        let sub = world.owned_sub_mut(owner, sub_id)?;
        sub.battery = (sub.battery - cost).clamp(0.0, 100.0);
        sub.ping_ready_at = now + power.cooldown_s;
        sub.touch();
        let battery_remaining = sub.battery;
        drop(world);

        info!(
            owner,
            sub_id = %sub_id,
            beam_deg,
            echoes = echoes_scheduled,
            heard_by = pending.len(),
            "ACTIVE_PING: アクティブピン送信"
        );
        self.hub().publish_all(pending);

        Ok(PingReceipt {
            battery_cost: cost,
            battery_remaining,
            echoes_scheduled,
        })
    }

    /// 魚雷の指令起爆
    ///
    /// # 戻り値
    ///
    /// 撃沈された艦の数
    pub fn detonate(&self, owner: OwnerId, torpedo_id: TorpedoId) -> Result<usize, CommandError> {
        let blast_radius = self.config().torpedo.blast_radius;
        let now = self.now();
        let mut world = self.lock_world();
        let torpedo = world.owned_torpedo_mut(owner, torpedo_id)?.clone();

        let outcome = explosion::resolve_detonation(&torpedo, world.subs(), blast_radius, now);
        for id in &outcome.killed {
            if let Some(sub) = world.sub_mut(id) {
                sub.health = 0.0;
                sub.touch();
            }
        }
        world.remove_torpedo(&torpedo_id);
        drop(world);

        let affected = outcome.affected_count();
        info!(
            owner,
            torpedo_id = %torpedo_id,
            x = torpedo.position.x,
            y = torpedo.position.y,
            depth = torpedo.position.depth,
            affected,
            "TORPEDO_DETONATED: 指令起爆"
        );
        let mut pending = PendingBroadcasts::default();
        pending.extend_with(outcome.notices, GameEvent::Explosion);
        self.hub().publish_all(pending);
        Ok(affected)
    }

    /// 自艦の自沈（所有者による除去）
    ///
    /// 発射済みの魚雷は次のティックで有線が切断されます。
    pub fn scuttle(&self, owner: OwnerId, sub_id: SubId) -> Result<(), CommandError> {
        let mut world = self.lock_world();
        world.owned_sub(owner, sub_id)?;
        world.remove_sub(&sub_id);
        drop(world);
        info!(owner, sub_id = %sub_id, "SUB_SCUTTLED: 自沈");
        Ok(())
    }

    /// 所有者スコープの状態読み出し
    pub fn state(&self, owner: OwnerId) -> OwnerState {
        let now = self.now();
        let world = self.lock_world();
        OwnerState::from_records(world.subs_of(owner), world.torpedoes_of(owner), now)
    }

    /// 全所有者の状態（認可は呼び出し側の責務）
    pub fn admin_state(&self) -> AdminState {
        let now = self.now();
        let world = self.lock_world();
        AdminState {
            subs: world
                .subs()
                .map(|s| AdminSubmarineView {
                    owner_id: s.owner_id,
                    sub: s.view(),
                })
                .collect(),
            torpedoes: world
                .torpedoes()
                .map(|t| AdminTorpedoView {
                    owner_id: t.owner_id,
                    parent_sub: t.parent_sub,
                    torpedo: t.view(),
                })
                .collect(),
            time: now,
        }
    }

    /// 有効なゲームルール
    pub fn rules(&self) -> &GameConfig {
        self.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SimClock};
    use crate::events::OutboundFrame;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn engine_with(mut cfg: GameConfig) -> (SimulationEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1000.0));
        cfg.sim.seed = Some(99);
        (SimulationEngine::in_memory(cfg, clock.clone()).unwrap(), clock)
    }

    fn engine() -> (SimulationEngine, Arc<ManualClock>) {
        engine_with(GameConfig::default())
    }

    /// 潜水艦を指定位置へ移動
    fn place(engine: &SimulationEngine, sub_id: SubId, x: f64, y: f64, depth: f64, heading: f64) {
        let mut world = engine.lock_world();
        let sub = world.sub_mut(&sub_id).unwrap();
        sub.position = Position3D::new(x, y, depth);
        sub.heading = heading;
    }

    fn drain(engine: &SimulationEngine, owner: OwnerId) -> Vec<OutboundFrame> {
        let sub = engine.subscribe(owner);
        std::iter::from_fn(|| sub.try_next()).collect()
    }

    #[test]
    fn test_spawn_initialises_every_field() {
        let (engine, _) = engine();
        let receipt = engine.spawn_submarine(1).unwrap();
        let state = engine.state(1);
        assert_eq!(state.subs.len(), 1);
        let sub = &state.subs[0];
        assert_eq!(sub.id, receipt.sub_id);
        assert!((80.0..=180.0).contains(&sub.depth));
        assert!((40.0..=80.0).contains(&sub.battery));
        assert_eq!(sub.throttle, 0.2);
        assert_eq!(sub.blow_charge, 100.0);
        assert_eq!(sub.health, 100.0);
        assert!(sub.target_depth.is_none());
        assert!(engine.state(2).subs.is_empty());
    }

    #[test]
    fn test_controls_clamp_and_reject_non_finite() {
        let (engine, _) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        let input = ControlInput {
            throttle: Some(3.0),
            planes: Some(-2.0),
            rudder_deg: Some(45.0),
            target_depth: DepthOrder::Set(-10.0),
            ..Default::default()
        };
        engine.set_controls(1, id, input).unwrap();
        let sub = engine.state(1).subs[0].clone();
        assert_eq!(sub.throttle, 1.0);
        assert_eq!(sub.planes, -1.0);
        assert_eq!(sub.rudder_cmd, 1.0);
        assert_eq!(sub.target_depth, Some(0.0));

        let nudge = ControlInput {
            rudder_nudge_deg: Some(-15.0),
            target_depth: DepthOrder::Clear,
            ..Default::default()
        };
        engine.set_controls(1, id, nudge).unwrap();
        let sub = engine.state(1).subs[0].clone();
        assert_relative_eq!(sub.rudder_cmd, 0.5);
        assert!(sub.target_depth.is_none());

        let bad = ControlInput {
            throttle: Some(0.1),
            planes: Some(f64::NAN),
            ..Default::default()
        };
        let err = engine.set_controls(1, id, bad).unwrap_err();
        assert_eq!(err.reason_code(), "invalid_parameter");
        // 何も変更されていない
        assert_eq!(engine.state(1).subs[0].throttle, 1.0);
    }

    #[test]
    fn test_foreign_and_missing_vehicles_are_rejected() {
        let (engine, _) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        assert_eq!(engine.set_snorkel(2, id, false).unwrap_err().reason_code(), "forbidden");
        assert_eq!(engine.emergency_blow(1, uuid::Uuid::nil()).unwrap_err().reason_code(), "not_found");
    }

    #[test]
    fn test_snorkel_too_deep() {
        let (engine, _) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        place(&engine, id, 0.0, 0.0, 100.0, 0.0);
        assert_eq!(engine.set_snorkel(1, id, true).unwrap_err().reason_code(), "too_deep");
        place(&engine, id, 0.0, 0.0, 10.0, 0.0);
        assert_eq!(engine.set_snorkel(1, id, true), Ok(true));
        assert_eq!(engine.set_snorkel(1, id, false), Ok(false));
    }

    #[test]
    fn test_emergency_blow_requires_charge() {
        let (engine, clock) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        assert_eq!(engine.emergency_blow(1, id), Ok(clock.now() + 10.0));
        engine.lock_world().sub_mut(&id).unwrap().blow_charge = 0.0;
        assert_eq!(engine.emergency_blow(1, id).unwrap_err(), CommandError::NoBlowCharge);
    }

    #[test]
    fn test_launch_validates_tube_and_places_torpedo() {
        let (engine, _) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        place(&engine, id, 0.0, 0.0, 100.0, 0.0);
        let err = engine.launch_torpedo(1, id, LaunchOrder { tube: 3, ..Default::default() }).unwrap_err();
        assert_eq!(err, CommandError::InvalidTube { tube: 3, max: 2 });

        let receipt = engine.launch_torpedo(1, id, LaunchOrder { tube: -1, ..Default::default() }).unwrap();
        assert_relative_eq!(receipt.x, 12.0);
        assert_relative_eq!(receipt.y, -2.0);
        assert_eq!(receipt.wire_length, 600.0);
        assert_eq!(engine.state(1).torpedoes.len(), 1);
    }

    #[test]
    fn test_extreme_tube_indices_are_rejected() {
        let (engine, _) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        for tube in [i32::MIN, i32::MAX] {
            let err = engine.launch_torpedo(1, id, LaunchOrder { tube, ..Default::default() }).unwrap_err();
            assert_eq!(err, CommandError::InvalidTube { tube, max: 2 });
        }
        assert!(engine.state(1).torpedoes.is_empty());
    }

    #[test]
    fn test_torpedo_commands_require_wire() {
        let (engine, _) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        let torpedo_id = engine.launch_torpedo(1, id, LaunchOrder::default()).unwrap().torpedo_id;

        engine.set_torpedo_heading(1, torpedo_id, HeadingOrder::Relative(45.0)).unwrap();
        engine.set_torpedo_heading(1, torpedo_id, HeadingOrder::Absolute(270.0)).unwrap();
        {
            let world = engine.lock_world();
            let t = world.torpedo(&torpedo_id).unwrap();
            assert!(t.pending_turn.is_none());
            assert_relative_eq!(t.target_heading.unwrap(), -std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
        }
        assert_eq!(engine.set_torpedo_depth(1, torpedo_id, 40.0), Ok(40.0));
        assert_eq!(engine.set_torpedo_depth(2, torpedo_id, 40.0).unwrap_err().reason_code(), "forbidden");

        engine.lock_world().torpedo_mut(&torpedo_id).unwrap().control_mode = crate::models::ControlMode::Free;
        let err = engine.set_torpedo_depth(1, torpedo_id, 10.0).unwrap_err();
        assert_eq!(err, CommandError::WireLost { torpedo_id });
        assert_eq!(engine.lock_world().torpedo(&torpedo_id).unwrap().target_depth, Some(40.0));
    }

    #[test]
    fn test_seeker_is_set_not_toggled() {
        let (engine, _) = engine();
        let id = engine.spawn_submarine(1).unwrap().sub_id;
        let with_seeker = engine.launch_torpedo(1, id, LaunchOrder::default()).unwrap().torpedo_id;
        assert_eq!(engine.set_torpedo_seeker(1, with_seeker, true), Ok(Seeker::On));
        assert_eq!(engine.set_torpedo_seeker(1, with_seeker, true), Ok(Seeker::On));
        assert_eq!(engine.set_torpedo_seeker(1, with_seeker, false), Ok(Seeker::Off));

        let order = LaunchOrder { seeker: Seeker::Absent, ..Default::default() };
        let without = engine.launch_torpedo(1, id, order).unwrap().torpedo_id;
        assert_eq!(engine.set_torpedo_seeker(1, without, true).unwrap_err().reason_code(), "invalid_parameter");
    }

    #[test]
    fn test_ping_costs_battery_and_enforces_cooldown() {
        let (engine, clock) = engine();
        let pinger = engine.spawn_submarine(1).unwrap().sub_id;
        let target = engine.spawn_submarine(2).unwrap().sub_id;
        place(&engine, pinger, 0.0, 0.0, 100.0, 0.0);
        place(&engine, target, 1500.0, 0.0, 100.0, 0.0);
        engine.lock_world().sub_mut(&pinger).unwrap().battery = 50.0;

        let order = PingOrder { beam_deg: 90.0, ..Default::default() };
        let receipt = engine.ping(1, pinger, order).unwrap();
        assert_relative_eq!(receipt.battery_cost, 1.9);
        assert_relative_eq!(receipt.battery_remaining, 48.1);
        assert_eq!(receipt.echoes_scheduled, 1);
        assert_eq!(engine.lock_world().pending_echo_count(), 1);

        // 1500m先の他所有者: snr = 5 - 1.875 > 1
        let frames = drain(&engine, 2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "active_ping_detected");

        let err = engine.ping(1, pinger, order).unwrap_err();
        assert_eq!(err.reason_code(), "ping_recharging");
        assert_relative_eq!(engine.state(1).subs[0].battery, 48.1);

        clock.advance(5.0);
        assert!(engine.ping(1, pinger, order).is_ok());
    }

    #[test]
    fn test_ping_battery_checks_happen_before_mutation() {
        let mut cfg = GameConfig::default();
        cfg.sonar.active_power.cost_per_degree = 0.1;
        let (engine, _) = engine_with(cfg);
        let pinger = engine.spawn_submarine(1).unwrap().sub_id;
        engine.lock_world().sub_mut(&pinger).unwrap().battery = 4.0;
        assert_eq!(engine.ping(1, pinger, PingOrder::default()).unwrap_err().reason_code(), "battery_too_low");

        engine.lock_world().sub_mut(&pinger).unwrap().battery = 5.5;
        // コスト 1 + 36 > 5.5
        let wide = PingOrder { beam_deg: 360.0, ..Default::default() };
        assert_eq!(engine.ping(1, pinger, wide).unwrap_err().reason_code(), "insufficient_battery");
        assert_eq!(engine.state(1).subs[0].battery, 5.5);
        assert_eq!(engine.lock_world().pending_echo_count(), 0);

        let bad = PingOrder { beam_deg: 0.0, ..Default::default() };
        assert_eq!(engine.ping(1, pinger, bad).unwrap_err().reason_code(), "invalid_parameter");
    }

    #[test]
    fn test_detonate_kills_in_radius_and_notifies_owners() {
        let (engine, _) = engine();
        let shooter = engine.spawn_submarine(1).unwrap().sub_id;
        let victim = engine.spawn_submarine(2).unwrap().sub_id;
        let bystander = engine.spawn_submarine(3).unwrap().sub_id;
        place(&engine, shooter, 0.0, 0.0, 100.0, 0.0);
        place(&engine, victim, 50.0, 0.0, 100.0, 0.0);
        place(&engine, bystander, 90.0, 0.0, 100.0, 0.0);
        let torpedo_id = engine.launch_torpedo(1, shooter, LaunchOrder::default()).unwrap().torpedo_id;

        // 魚雷は x=12 に出現: 母艦 12m、被害艦 38m、傍観艦 78m
        let affected = engine.detonate(1, torpedo_id).unwrap();
        assert_eq!(affected, 2);
        assert!(engine.state(1).torpedoes.is_empty());
        assert_eq!(engine.state(2).subs[0].health, 0.0);
        assert_eq!(engine.state(3).subs[0].health, 100.0);

        let frames = drain(&engine, 2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "explosion");
        assert!(drain(&engine, 3).is_empty());

        assert_eq!(engine.detonate(1, torpedo_id).unwrap_err().reason_code(), "not_found");
    }

    #[test]
    fn test_scuttle_and_admin_state() {
        let (engine, _) = engine();
        let a = engine.spawn_submarine(1).unwrap().sub_id;
        engine.spawn_submarine(2).unwrap();
        assert_eq!(engine.admin_state().subs.len(), 2);
        assert_eq!(engine.scuttle(2, a).unwrap_err().reason_code(), "forbidden");
        engine.scuttle(1, a).unwrap();
        let admin = engine.admin_state();
        assert_eq!(admin.subs.len(), 1);
        assert_eq!(admin.subs[0].owner_id, 2);
        assert_eq!(engine.rules().sim.tick_hz, 10.0);
    }
}
