//! # Sonar モジュール
//!
//! パッシブ探知、アクティブピンの反響スケジューリングと解決、
//! 第三者によるピン探知、魚雷シーカーの探信を提供します。
//!
//! パッシブ探知と第三者のピン探知は意図的に別々のモデル（別の式）です。
//! 乱数を使う処理は呼び出し側から渡された乱数生成器のみを使用します。

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::{SeekerConfig, SonarConfig};
use crate::models::{
    common::{math_utils, OwnerId, Position3D, SubId, TorpedoId},
    submarine::Submarine,
    torpedo::Torpedo,
    traits::{IEntity, ISonarTarget},
};

/// 到達待ちのアクティブソナー反響
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEcho {
    /// 反響が観測者に届く時刻
    pub arrival_time: f64,
    /// 真の3次元距離
    pub range: f64,
    /// 真方位（ワールド座標系）
    pub bearing: f64,
    pub echo_level: f64,
    pub observer_sub_id: SubId,
    pub observer_owner: OwnerId,
    pub observer_depth: f64,
    pub target_depth: f64,
}

/// パッシブ探知の距離区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeClass {
    Short,
    Medium,
    Long,
}

/// パッシブ探知報告（`contact` イベント）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveContact {
    pub observer_sub_id: SubId,
    pub bearing: f64,
    pub bearing_relative: f64,
    pub range_class: RangeClass,
    pub snr: f64,
    pub time: f64,
}

/// アクティブ反響報告（`echo` イベント）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoReport {
    pub observer_sub_id: SubId,
    pub bearing: f64,
    pub bearing_relative: f64,
    pub range: f64,
    pub quality: f64,
    pub vertical_angle: f64,
    pub estimated_depth: f64,
    pub time: f64,
}

/// 他艦のピンを聴知した報告（`active_ping_detected` イベント）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingDetection {
    /// 聴知した側の潜水艦
    pub observer_sub_id: SubId,
    /// ピン発信艦への方位
    pub bearing: f64,
    pub snr: f64,
    pub time: f64,
}

/// シーカーが捉えた目標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekerContact {
    pub bearing: f64,
    pub range: f64,
    pub depth: f64,
}

/// 魚雷シーカーの探信結果（`torpedo_ping` イベント）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekerReport {
    pub torpedo_id: TorpedoId,
    pub contacts: Vec<SeekerContact>,
    pub time: f64,
}

/// アクティブピンのビーム指定（ワールド座標系）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingBeam {
    pub center_bearing: f64,
    pub beam_deg: f64,
    pub max_range: f64,
}

/// 距離区分の判定
pub fn range_class(range: f64, cfg: &SonarConfig) -> RangeClass {
    if range < cfg.passive.short_range_m {
        RangeClass::Short
    } else if range < cfg.passive.medium_range_m {
        RangeClass::Medium
    } else {
        RangeClass::Long
    }
}

/// パッシブ探知のSNR
pub fn passive_snr<T: ISonarTarget>(target: &T, range: f64, max_speed: f64, cfg: &SonarConfig) -> f64 {
    let p = &cfg.passive;
    let speed_noise = if max_speed > 0.0 {
        p.speed_noise_gain * (target.radiated_speed() / max_speed)
    } else {
        0.0
    };
    let snorkel_bonus = if target.is_snorkeling() { p.snorkel_bonus } else { 0.0 };
    p.base_snr + speed_noise + snorkel_bonus - (range / 1000.0) * 2.0 - target.get_position().depth / 200.0
}

/// パッシブソナー走査
///
/// 各観測艦について報告間隔を満たす場合のみ、他所有者の艦を順に調べ、
/// 最初に検知できた1隻を報告します。報告した観測艦の `last_report` を更新します。
///
/// # 戻り値
///
/// (宛先所有者, 探知報告) のリスト
pub fn passive_sweep<R: Rng + ?Sized>(
    subs: &mut [Submarine],
    now: f64,
    max_speed: f64,
    cfg: &SonarConfig,
    rng: &mut R,
) -> Vec<(OwnerId, PassiveContact)> {
    let p = &cfg.passive;
    let mut reports = Vec::new();

    for i in 0..subs.len() {
        let obs = &subs[i];
        if !obs.is_alive() {
            continue;
        }
        let interval = rng.gen_range(p.report_interval_s[0]..=p.report_interval_s[1]);
        if now - obs.last_report < interval {
            continue;
        }

        let mut detection = None;
        for tgt in subs.iter() {
            if tgt.is_owned_by(obs.owner_id) || !tgt.is_alive() {
                continue;
            }
            let range = obs.position.distance_xy(&tgt.position);
            if range > cfg.active.max_range {
                continue;
            }
            let snr = passive_snr(tgt, range, max_speed, cfg);
            if snr < p.detection_floor {
                continue;
            }

            let jitter_deg = if tgt.position.depth < p.shallow_depth_m {
                p.bearing_jitter_deg
            } else {
                p.deep_bearing_jitter_deg
            };
            let jitter = math_utils::deg_to_rad(jitter_deg);
            let bearing = math_utils::wrap_angle(obs.position.bearing_to(&tgt.position) + rng.gen_range(-jitter..=jitter));
            detection = Some(PassiveContact {
                observer_sub_id: obs.id,
                bearing,
                bearing_relative: math_utils::angle_difference(obs.heading, bearing),
                range_class: range_class(range, cfg),
                snr,
                time: now,
            });
            break;
        }

        if let Some(contact) = detection {
            let obs = &mut subs[i];
            obs.last_report = now;
            reports.push((obs.owner_id, contact));
        }
    }

    reports
}

/// ピンの反響を予約
///
/// ピン発信艦以外の全艦のうち、ビーム内かつ最大距離以内のものについて
/// 往復伝搬時間後に届く反響を返します。
pub fn schedule_ping<'a, I>(observer: &Submarine, targets: I, beam: PingBeam, now: f64, cfg: &SonarConfig) -> Vec<PendingEcho>
where
    I: IntoIterator<Item = &'a Submarine>,
{
    let max_range = beam.max_range.min(cfg.active.max_range);
    let half_beam = math_utils::deg_to_rad(beam.beam_deg / 2.0);

    targets
        .into_iter()
        .filter(|tgt| tgt.id != observer.id && tgt.is_alive())
        .filter_map(|tgt| {
            let range = observer.position.distance_3d(&tgt.position);
            if range > max_range {
                return None;
            }
            let bearing = observer.position.bearing_to(&tgt.position);
            if math_utils::angle_difference(beam.center_bearing, bearing).abs() > half_beam {
                return None;
            }
            let echo_level = 18.0 - range / 400.0 + if tgt.is_snorkeling() { 8.0 } else { 0.0 };
            Some(PendingEcho {
                arrival_time: now + 2.0 * range / cfg.active.sound_speed,
                range,
                bearing,
                echo_level,
                observer_sub_id: observer.id,
                observer_owner: observer.owner_id,
                observer_depth: observer.position.depth,
                target_depth: tgt.position.depth,
            })
        })
        .collect()
}

/// 反響レベルから品質（0..1）を計算
pub fn echo_quality(echo_level: f64) -> f64 {
    1.0 / (1.0 + (-(echo_level - 10.0) / 6.0).exp())
}

/// 到達済みの反響を推定値付きの報告に変換
///
/// `heading_of` は観測艦の現在針路を返します（消滅していれば None、相対方位は針路0で計算）。
pub fn resolve_echoes<R, F>(due: Vec<PendingEcho>, heading_of: F, now: f64, cfg: &SonarConfig, rng: &mut R) -> Vec<(OwnerId, EchoReport)>
where
    R: Rng + ?Sized,
    F: Fn(SubId) -> Option<f64>,
{
    let a = &cfg.active;
    due.into_iter()
        .map(|echo| {
            let q = echo_quality(echo.echo_level);
            let bearing_noise = math_utils::deg_to_rad(a.brg_sigma_deg) * (1.0 - q);
            let range_noise = (a.rng_sigma_m * (1.0 - q)).max(5.0);
            let bearing = math_utils::wrap_angle(echo.bearing + rng.gen_range(-bearing_noise..=bearing_noise));
            let range = (echo.range + rng.gen_range(-range_noise..=range_noise)).max(1.0);

            let dz = echo.target_depth - echo.observer_depth;
            let horizontal = (echo.range * echo.range - dz * dz).max(0.0).sqrt().max(1e-3);
            let vertical_angle = dz.atan2(horizontal);

            let sigma = (30.0 * (1.0 - q)).max(3.0);
            let depth_noise = Normal::new(0.0, sigma).map(|n| n.sample(rng)).unwrap_or(0.0);

            let heading = heading_of(echo.observer_sub_id).unwrap_or(0.0);
            let report = EchoReport {
                observer_sub_id: echo.observer_sub_id,
                bearing,
                bearing_relative: math_utils::angle_difference(heading, bearing),
                range,
                quality: q,
                vertical_angle,
                estimated_depth: echo.target_depth + depth_noise,
                time: now,
            };
            (echo.observer_owner, report)
        })
        .collect()
}

/// 第三者によるピン聴知
///
/// 発信艦と異なる所有者の艦について、ビーム幅と水平距離から決まるSNRが
/// しきい値を超えれば発信艦への方位を通知します。乱数は使いません。
pub fn ping_exposure<'a, I>(pinger: &Submarine, others: I, beam_deg: f64, now: f64, cfg: &SonarConfig) -> Vec<(OwnerId, PingDetection)>
where
    I: IntoIterator<Item = &'a Submarine>,
{
    let e = &cfg.ping_exposure;
    others
        .into_iter()
        .filter(|other| !other.is_owned_by(pinger.owner_id) && other.is_alive())
        .filter_map(|other| {
            let snr = e.gain * (beam_deg / e.reference_beam_deg) - other.position.distance_xy(&pinger.position) / e.falloff_m;
            (snr > e.threshold).then(|| {
                (
                    other.owner_id,
                    PingDetection {
                        observer_sub_id: other.id,
                        bearing: other.position.bearing_to(&pinger.position),
                        snr,
                        time: now,
                    },
                )
            })
        })
        .collect()
}

/// 魚雷シーカーの前方コーン探信
///
/// 魚雷所有者以外の生存艦のうち、針路中心のビーム内かつ探知距離以内のものを返します。
pub fn seeker_scan<'a, I>(torpedo: &Torpedo, targets: I, now: f64, cfg: &SeekerConfig) -> SeekerReport
where
    I: IntoIterator<Item = &'a Submarine>,
{
    let half_beam = math_utils::deg_to_rad(cfg.beam_deg / 2.0);
    let origin: Position3D = torpedo.position;
    let contacts = targets
        .into_iter()
        .filter(|tgt| !tgt.is_owned_by(torpedo.owner_id) && tgt.is_alive())
        .filter_map(|tgt| {
            let range = origin.distance_3d(&tgt.position);
            let bearing = origin.bearing_to(&tgt.position);
            (range <= cfg.range && math_utils::angle_difference(torpedo.heading, bearing).abs() <= half_beam).then(|| {
                SeekerContact {
                    bearing,
                    range,
                    depth: tgt.position.depth,
                }
            })
        })
        .collect();

    SeekerReport {
        torpedo_id: torpedo.id,
        contacts,
        time: now,
    }
}
