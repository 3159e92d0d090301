//! # Simulation モジュール
//!
//! 潜水艦戦シミュレーションの中核となるエンジンとティックスケジューラを提供します。
//!
//! ワールドストアは単一の排他ロックで保護され、コマンド処理とティック処理が
//! 同じストアを共有します。ティック処理は計算中にロックを保持しないため、
//! 重いソナー・物理計算の最中でもコマンドの応答は遅れません。
//!
//! ## ティック処理順序
//!
//! 各周期において、以下の順序で処理が実行されます：
//!
//! 1. **スナップショット**（ロック）: 生存艦・魚雷の複製と到達済み反響の取り出し
//! 2. **計算**（ロックなし）: 艦の積分、魚雷誘導、シーカー探信、近接信管、
//!    パッシブ探知、反響の解決
//! 3. **コミット**（ロック）: 変更内容を段階的に構築してから一括適用
//! 4. **配信**（ロックなし）: イベント配信、定期スナップショット、永続化
//!
//! ## コミット時の競合解決
//!
//! スナップショット以降にコマンドで変更された記録（改訂番号が異なる記録）は次のように扱います。
//!
//! - **潜水艦**: 現在の記録から積分し直す（コマンド → ティックの順に適用したのと同じ結果）
//! - **魚雷**: 計算した運動状態を保ち、コマンドが所有する項目を現在の記録から取る
//!   （ティック → コマンドの順に適用したのと同じ結果）
//! - 途中で消えた記録はそのティックでは読み飛ばす
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use subsim::clock::SystemClock;
//! use subsim::config::GameConfig;
//! use subsim::simulation::SimulationEngine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SimulationEngine::in_memory(GameConfig::default(), Arc::new(SystemClock))?;
//! let handle = engine.spawn_tick_loop();
//! let receipt = engine.spawn_submarine(1)?;
//! // ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::clock::SimClock;
use crate::config::GameConfig;
use crate::error::EngineError;
use crate::events::{GameEvent, OwnerState, PendingBroadcasts};
use crate::fanout::{EventHub, Subscription};
use crate::models::{
    explosion, sonar, ControlMode, SubId, Submarine, Torpedo, TorpedoEndReason, TorpedoId,
};
use crate::persistence::{NoPersistence, WorldPersistence};
use crate::world::{WorldSnapshot, WorldStore};

/// ティックループだけが触る状態
struct TickState {
    rng: StdRng,
    last_cycle_start: Option<f64>,
    last_snapshot_at: Option<f64>,
    tick_count: u64,
}

struct EngineShared {
    world: Mutex<WorldStore>,
    tick: Mutex<TickState>,
    hub: EventHub,
    clock: Arc<dyn SimClock>,
    config: GameConfig,
    persistence: Box<dyn WorldPersistence>,
}

/// シミュレーションエンジン
///
/// 複製しても同じワールドを共有するハンドルです。
#[derive(Clone)]
pub struct SimulationEngine {
    shared: Arc<EngineShared>,
}

/// 計算フェーズの結果
#[derive(Debug, Default)]
pub(crate) struct ComputeOutput {
    /// スナップショット時点の改訂番号
    base_revisions: BTreeMap<uuid::Uuid, u64>,
    subs: Vec<Submarine>,
    torpedoes: Vec<Torpedo>,
    removed_torpedoes: Vec<(TorpedoId, TorpedoEndReason)>,
    kills: BTreeSet<SubId>,
    broadcasts: PendingBroadcasts,
}

/// コミットの段階的変更
enum StagedChange {
    Sub(Submarine),
    Torpedo(Torpedo),
    RemoveTorpedo(TorpedoId),
    Kill(SubId),
}

/// コミット結果の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub applied: usize,
    pub rebased: usize,
    pub skipped: usize,
    pub removed_subs: usize,
    pub removed_torpedoes: usize,
}

/// 1周期の実行結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub tick: u64,
    pub now: f64,
    pub dt: f64,
    pub commit: CommitSummary,
    pub events: usize,
}

impl SimulationEngine {
    /// 永続化ストアから復元してエンジンを作成
    pub fn new(
        config: GameConfig,
        clock: Arc<dyn SimClock>,
        persistence: Box<dyn WorldPersistence>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let world = match persistence.load()? {
            Some(image) => WorldStore::from_image(image, config.sim.seed),
            None => WorldStore::new(config.sim.seed),
        };
        Ok(Self::assemble(config, clock, persistence, world))
    }

    /// 永続化なしのエンジンを作成
    ///
    /// 不正なゲームルールは `EngineError::Config` で拒否します。
    pub fn in_memory(config: GameConfig, clock: Arc<dyn SimClock>) -> Result<Self, EngineError> {
        config.validate()?;
        let world = WorldStore::new(config.sim.seed);
        Ok(Self::assemble(config, clock, Box::new(NoPersistence), world))
    }

    fn assemble(
        config: GameConfig,
        clock: Arc<dyn SimClock>,
        persistence: Box<dyn WorldPersistence>,
        world: WorldStore,
    ) -> Self {
        // ティック用乱数はコマンド用と別系列
        let rng = match config.sim.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        let hub = EventHub::new(config.fanout.clone(), Arc::clone(&clock));
        Self {
            shared: Arc::new(EngineShared {
                world: Mutex::new(world),
                tick: Mutex::new(TickState {
                    rng,
                    last_cycle_start: None,
                    last_snapshot_at: None,
                    tick_count: 0,
                }),
                hub,
                clock,
                config,
                persistence,
            }),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.shared.config
    }

    pub fn hub(&self) -> &EventHub {
        &self.shared.hub
    }

    pub fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    /// 所有者のイベントストリームを購読
    pub fn subscribe(&self, owner: crate::models::OwnerId) -> Subscription {
        self.shared.hub.subscribe(owner)
    }

    /// ワールドのロックを取得
    ///
    /// コミットは段階構築後に失敗しない適用を行うため、
    /// ポイズンされていてもストアの内容は一貫しています。
    pub(crate) fn lock_world(&self) -> MutexGuard<'_, WorldStore> {
        self.shared.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tick(&self) -> MutexGuard<'_, TickState> {
        self.shared.tick.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 現在時刻で1周期を実行
    ///
    /// Δtは前回周期開始からの実測値を `[0, max_dt]` に制限したもので、
    /// 初回は公称周期を使います。
    pub fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        let now = self.now();
        let cfg = self.config();
        let mut tick = self.lock_tick();
        let dt = match tick.last_cycle_start {
            Some(prev) => (now - prev).clamp(0.0, cfg.sim.max_dt_s),
            None => cfg.tick_period_s(),
        };
        tick.last_cycle_start = Some(now);
        self.cycle(&mut tick, now, dt)
    }

    /// 時刻とΔtを明示して1周期を実行
    pub fn step(&self, now: f64, dt: f64) -> Result<CycleReport, EngineError> {
        let mut tick = self.lock_tick();
        tick.last_cycle_start = Some(now);
        self.cycle(&mut tick, now, dt)
    }

    fn cycle(&self, tick: &mut TickState, now: f64, dt: f64) -> Result<CycleReport, EngineError> {
        tick.tick_count += 1;
        trace!(tick = tick.tick_count, now, dt, "TICK_START");

        let snapshot = self.lock_world().snapshot(now);
        let mut output = compute(snapshot, now, dt, self.config(), &mut tick.rng);
        let broadcasts = std::mem::take(&mut output.broadcasts);
        let commit = {
            let mut world = self.lock_world();
            commit(&mut world, output, now, dt, self.config())
        };

        let events = self.fanout(tick, broadcasts, now)?;

        Ok(CycleReport {
            tick: tick.tick_count,
            now,
            dt,
            commit,
            events,
        })
    }

    /// 配信フェーズ（ロックなし、状態読み出しのみ短時間ロック）
    fn fanout(&self, tick: &mut TickState, mut broadcasts: PendingBroadcasts, now: f64) -> Result<usize, EngineError> {
        let cfg = self.config();

        let snapshot_due = tick
            .last_snapshot_at
            .map(|at| now - at >= cfg.sim.snapshot_interval_s)
            .unwrap_or(true);
        if snapshot_due {
            tick.last_snapshot_at = Some(now);
            let owners = self.hub().owners();
            if !owners.is_empty() {
                let world = self.lock_world();
                for owner in owners {
                    let state = OwnerState::from_records(world.subs_of(owner), world.torpedoes_of(owner), now);
                    broadcasts.push(owner, GameEvent::Snapshot(state));
                }
            }
        }

        let events = broadcasts.len();
        if !broadcasts.is_empty() {
            self.hub().publish_all(broadcasts);
        }

        let every = cfg.sim.persist_every_ticks;
        if every > 0 && tick.tick_count % every == 0 {
            let image = self.lock_world().image();
            self.shared.persistence.store(&image)?;
        }

        Ok(events)
    }

    /// バックグラウンドのティックループを起動
    ///
    /// 各周期はブロッキングプールで実行され、エラーやパニックは記録して次の周期へ進みます。
    pub fn spawn_tick_loop(&self) -> TickLoopHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = self.clone();
        let period = Duration::from_secs_f64(self.config().tick_period_s());

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "TICK_LOOP_STARTED: ティックループ開始");

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let cycle_engine = engine.clone();
                match tokio::task::spawn_blocking(move || cycle_engine.run_cycle()).await {
                    Ok(Ok(report)) => {
                        if report.tick % 100 == 0 {
                            debug!(
                                tick = report.tick,
                                dt = report.dt,
                                events = report.events,
                                "進行状況"
                            );
                        }
                    }
                    Ok(Err(e)) => error!(error = %e, "TICK_FAILED: ティック処理エラー（次周期で継続）"),
                    Err(join_error) => {
                        let e = EngineError::CyclePanicked(join_error.to_string());
                        error!(error = %e, "TICK_PANICKED: ティック処理が異常終了（次周期で継続）");
                    }
                }
            }

            info!("TICK_LOOP_STOPPED: ティックループ停止");
        });

        TickLoopHandle { shutdown: shutdown_tx, join }
    }
}

/// ティックループのハンドル
pub struct TickLoopHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TickLoopHandle {
    /// ループを停止して終了を待つ
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "ティックループの終了待ちに失敗");
        }
    }
}

/// 計算フェーズ
///
/// スナップショットだけを入力とし、ワールドには触れません。
pub(crate) fn compute(snapshot: WorldSnapshot, now: f64, dt: f64, cfg: &GameConfig, rng: &mut StdRng) -> ComputeOutput {
    let WorldSnapshot {
        subs: base_subs,
        torpedoes: base_torpedoes,
        due_echoes,
    } = snapshot;

    let mut out = ComputeOutput::default();
    out.base_revisions.extend(base_subs.iter().map(|s| (s.id, s.revision)));
    out.base_revisions.extend(base_torpedoes.iter().map(|t| (t.id, t.revision)));

    // 艦の積分（全艦が同じΔtと同じスナップショットを見る）
    let mut subs: Vec<Submarine> = base_subs.iter().map(|s| s.integrate(dt, now, &cfg.sub)).collect();

    // 魚雷の誘導
    for base in &base_torpedoes {
        let parent = subs.iter().find(|s| s.id == base.parent_sub);
        let (mut torpedo, end) = base.guide(parent, dt, now, &cfg.torpedo);

        if base.control_mode == ControlMode::Wire && torpedo.control_mode == ControlMode::Free {
            info!(torpedo_id = %torpedo.id, owner = torpedo.owner_id, "WIRE_LOST: 有線切断");
        }

        if let Some(reason) = end {
            info!(torpedo_id = %torpedo.id, owner = torpedo.owner_id, ?reason, "TORPEDO_REMOVED: 魚雷消滅");
            out.removed_torpedoes.push((torpedo.id, reason));
            continue;
        }

        if torpedo.seeker_due(now) {
            let report = sonar::seeker_scan(&torpedo, &subs, now, &cfg.torpedo.seeker);
            torpedo.seeker_next_at = now + cfg.torpedo.seeker.interval_s;
            out.broadcasts.push(torpedo.owner_id, GameEvent::TorpedoPing(report));
        }

        let live = subs.iter().filter(|s| !out.kills.contains(&s.id));
        if torpedo.proximity_triggered(live.clone(), now, &cfg.torpedo) {
            let outcome = explosion::resolve_detonation(&torpedo, live, cfg.torpedo.blast_radius, now);
            info!(
                torpedo_id = %torpedo.id,
                owner = torpedo.owner_id,
                x = torpedo.position.x,
                y = torpedo.position.y,
                depth = torpedo.position.depth,
                affected = outcome.affected_count(),
                "TORPEDO_DETONATED: 近接信管作動"
            );
            out.kills.extend(outcome.killed.iter().copied());
            out.broadcasts.extend_with(outcome.notices, GameEvent::Explosion);
            out.removed_torpedoes.push((torpedo.id, TorpedoEndReason::Detonated));
            continue;
        }

        out.torpedoes.push(torpedo);
    }

    for sub in subs.iter_mut().filter(|s| out.kills.contains(&s.id)) {
        sub.health = 0.0;
    }

    // パッシブ探知
    let contacts = sonar::passive_sweep(&mut subs, now, cfg.sub.max_speed, &cfg.sonar, rng);
    out.broadcasts.extend_with(contacts, GameEvent::Contact);

    // 反響の解決
    let echoes = sonar::resolve_echoes(
        due_echoes,
        |id| subs.iter().find(|s| s.id == id).map(|s| s.heading),
        now,
        &cfg.sonar,
        rng,
    );
    out.broadcasts.extend_with(echoes, GameEvent::Echo);

    out.subs = subs;
    out
}

/// コミットフェーズ
///
/// 読み取り専用で変更を段階構築し、その後失敗しない適用を行います。
pub(crate) fn commit(world: &mut WorldStore, output: ComputeOutput, now: f64, dt: f64, cfg: &GameConfig) -> CommitSummary {
    let mut summary = CommitSummary::default();
    let mut staged = Vec::with_capacity(output.subs.len() + output.torpedoes.len());
    let base_revision = |id: &uuid::Uuid| output.base_revisions.get(id).copied();

    for computed in output.subs {
        let Some(current) = world.sub(&computed.id) else {
            debug!(sub_id = %computed.id, "COMMIT_SKIP: 潜水艦が計算中に消滅");
            summary.skipped += 1;
            continue;
        };
        if base_revision(&computed.id) == Some(current.revision) {
            staged.push(StagedChange::Sub(computed));
        } else {
            // コマンドを反映した現在の記録から積分し直す
            let mut rebased = current.integrate(dt, now, &cfg.sub);
            rebased.last_report = computed.last_report;
            if computed.health <= 0.0 {
                rebased.health = 0.0;
            }
            debug!(sub_id = %computed.id, "COMMIT_REBASE: コマンド適用後の記録で再計算");
            summary.rebased += 1;
            staged.push(StagedChange::Sub(rebased));
        }
    }

    for mut computed in output.torpedoes {
        let Some(current) = world.torpedo(&computed.id) else {
            debug!(torpedo_id = %computed.id, "COMMIT_SKIP: 魚雷が計算中に消滅");
            summary.skipped += 1;
            continue;
        };
        if base_revision(&computed.id) != Some(current.revision) {
            // コマンドが所有する項目は現在の記録を優先
            computed.target_depth = current.target_depth;
            computed.target_heading = current.target_heading;
            computed.pending_turn = current.pending_turn;
            computed.seeker = current.seeker;
            computed.seeker_next_at = current.seeker_next_at;
            computed.revision = current.revision;
            summary.rebased += 1;
        }
        staged.push(StagedChange::Torpedo(computed));
    }

    staged.extend(output.removed_torpedoes.iter().map(|(id, _)| StagedChange::RemoveTorpedo(*id)));
    staged.extend(output.kills.iter().map(|id| StagedChange::Kill(*id)));

    // 適用
    for change in staged {
        match change {
            StagedChange::Sub(sub) => {
                world.insert_sub(sub);
                summary.applied += 1;
            }
            StagedChange::Torpedo(torpedo) => {
                world.insert_torpedo(torpedo);
                summary.applied += 1;
            }
            StagedChange::RemoveTorpedo(id) => {
                if world.remove_torpedo(&id).is_some() {
                    summary.removed_torpedoes += 1;
                }
            }
            StagedChange::Kill(id) => {
                if let Some(sub) = world.sub_mut(&id) {
                    sub.health = 0.0;
                }
            }
        }
    }

    let destroyed: Vec<SubId> = world.subs().filter(|s| s.health <= 0.0).map(|s| s.id).collect();
    for id in destroyed {
        if let Some(sub) = world.remove_sub(&id) {
            info!(sub_id = %id, owner = sub.owner_id, "SUB_DESTROYED: 潜水艦喪失");
            summary.removed_subs += 1;
        }
    }

    summary
}
