use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    common::{OwnerId, SubId, TorpedoId},
    torpedo::Torpedo,
    traits::ISonarTarget,
};

/// 爆発通知（`explosion` イベント）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplosionReport {
    /// 起爆点 [x, y, depth]
    pub at: [f64; 3],
    pub torpedo_id: TorpedoId,
    pub blast_radius: f64,
    /// 宛先所有者の被害艦
    pub affected: Vec<SubId>,
    pub time: f64,
}

/// 起爆判定の結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetonationOutcome {
    /// 撃沈された艦（耐久値0にする）
    pub killed: Vec<SubId>,
    /// 被害所有者ごとの通知
    pub notices: Vec<(OwnerId, ExplosionReport)>,
}

impl DetonationOutcome {
    pub fn affected_count(&self) -> usize {
        self.killed.len()
    }
}

/// 魚雷の起爆を解決
///
/// 起爆点から3次元距離で爆発半径以内にある生存艦をすべて撃沈扱いとし、
/// 被害を受けた所有者ごとに1件の通知を作成します。
/// 魚雷自体の除去は呼び出し側が行います。
///
/// # 引数
///
/// * `torpedo` - 起爆する魚雷
/// * `targets` - 判定対象の艦
/// * `blast_radius` - 爆発半径（m）
/// * `now` - 現在時刻
pub fn resolve_detonation<'a, T, I>(torpedo: &Torpedo, targets: I, blast_radius: f64, now: f64) -> DetonationOutcome
where
    T: ISonarTarget + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let at = torpedo.position;
    let mut by_owner: BTreeMap<OwnerId, Vec<SubId>> = BTreeMap::new();
    let mut killed = Vec::new();

    for target in targets {
        if !target.is_alive() {
            continue;
        }
        if at.distance_3d(&target.get_position()) <= blast_radius {
            killed.push(target.get_id());
            by_owner.entry(target.get_owner()).or_default().push(target.get_id());
        }
    }

    let notices = by_owner
        .into_iter()
        .map(|(owner, affected)| {
            (
                owner,
                ExplosionReport {
                    at: [at.x, at.y, at.depth],
                    torpedo_id: torpedo.id,
                    blast_radius,
                    affected,
                    time: now,
                },
            )
        })
        .collect();

    DetonationOutcome { killed, notices }
}
