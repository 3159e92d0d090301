use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// 設定メタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

impl Default for ConfigMeta {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            name: "sub-brawl".to_string(),
            description: "default rules".to_string(),
        }
    }
}

/// シミュレーション周期の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// ティック周波数 [Hz]
    pub tick_hz: f64,
    /// 1周期で許容する最大Δt [s]（停止・ジッタの影響を抑える）
    pub max_dt_s: f64,
    /// 乱数シード（未指定時はOSエントロピー）
    pub seed: Option<u64>,
    /// 所有者ごとの定期スナップショット間隔 [s]
    pub snapshot_interval_s: f64,
    /// 永続化の間隔 [ティック]（0で無効）
    pub persist_every_ticks: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_hz: 10.0,
            max_dt_s: 0.25,
            seed: None,
            snapshot_interval_s: 1.0,
            persist_every_ticks: 0,
        }
    }
}

/// 交戦海域（リング）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RingConfig {
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, r: 6000.0 }
    }
}

/// 世界設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorldConfig {
    pub ring: RingConfig,
    pub spawn_min_r: f64,
    pub spawn_max_r: f64,
    /// 既存艦からの最小離隔 [m]
    pub safe_spawn_separation: f64,
    pub spawn_attempts: u32,
    /// 出現深度の範囲 [m]
    pub spawn_depth_m: [f64; 2],
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            ring: RingConfig::default(),
            spawn_min_r: 500.0,
            spawn_max_r: 4500.0,
            safe_spawn_separation: 800.0,
            spawn_attempts: 50,
            spawn_depth_m: [80.0, 180.0],
        }
    }
}

/// 深度保持オートパイロット
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutopilotConfig {
    /// 手動プレーンズがこの値未満のときのみ作動
    pub planes_deadband: f64,
    /// 深度誤差1mあたりの目標ピッチ [deg]
    pub pitch_gain_deg_per_m: f64,
    pub max_pitch_deg: f64,
    /// 深度誤差1mあたりの直接鉛直速度 [m/s]
    pub vertical_gain: f64,
    pub max_vertical_mps: f64,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            planes_deadband: 0.05,
            pitch_gain_deg_per_m: 0.5,
            max_pitch_deg: 25.0,
            vertical_gain: 0.02,
            max_vertical_mps: 1.5,
        }
    }
}

/// 緊急ブロー
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmergencyBlowConfig {
    pub duration_s: f64,
    pub upward_mps: f64,
    /// シュノーケル充電時のブローチャージ回復量 [%/s]
    pub recharge_per_s_at_snorkel: f64,
}

impl Default for EmergencyBlowConfig {
    fn default() -> Self {
        Self {
            duration_s: 10.0,
            upward_mps: 5.0,
            recharge_per_s_at_snorkel: 6.0,
        }
    }
}

/// バッテリー
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub initial_min: f64,
    pub initial_max: f64,
    pub drain_per_throttle_per_s: f64,
    pub recharge_per_s_snorkel: f64,
    /// 残量ゼロ時のスロットル上限
    pub empty_throttle_cap: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            initial_min: 40.0,
            initial_max: 80.0,
            drain_per_throttle_per_s: 0.02,
            recharge_per_s_snorkel: 0.25,
            empty_throttle_cap: 0.1,
        }
    }
}

/// 潜水艦の性能パラメータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmarineConfig {
    pub max_speed: f64,
    pub yaw_rate_deg_s: f64,
    pub pitch_rate_deg_s: f64,
    pub planes_effect: f64,
    /// プレーンズ全舵時の目標ピッチ [deg]
    pub max_pitch_deg: f64,
    /// 舵角の物理リミット [deg]
    pub max_rudder_deg: f64,
    /// 舵サーボのスルーレート [deg/s]
    pub rudder_rate_deg_s: f64,
    /// 低速時の自然沈降 [m/s]
    pub neutral_bias: f64,
    /// ピッチ→鉛直速度の揚力係数
    pub lift_coefficient: f64,
    pub snorkel_depth: f64,
    /// シュノーケル自動解除のヒステリシス幅 [m]
    pub snorkel_hysteresis_m: f64,
    pub crush_depth: f64,
    pub crush_dps_per_100m: f64,
    pub initial_throttle: f64,
    pub autopilot: AutopilotConfig,
    pub emergency_blow: EmergencyBlowConfig,
    pub battery: BatteryConfig,
}

impl Default for SubmarineConfig {
    fn default() -> Self {
        Self {
            max_speed: 6.0,
            yaw_rate_deg_s: 20.0,
            pitch_rate_deg_s: 12.0,
            planes_effect: 1.0,
            max_pitch_deg: 20.0,
            max_rudder_deg: 30.0,
            rudder_rate_deg_s: 60.0,
            neutral_bias: 0.008,
            lift_coefficient: 0.45,
            snorkel_depth: 15.0,
            snorkel_hysteresis_m: 2.0,
            crush_depth: 500.0,
            crush_dps_per_100m: 30.0,
            initial_throttle: 0.2,
            autopilot: AutopilotConfig::default(),
            emergency_blow: EmergencyBlowConfig::default(),
            battery: BatteryConfig::default(),
        }
    }
}

/// 魚雷シーカー（終末誘導用アクティブソナー）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SeekerConfig {
    pub interval_s: f64,
    pub beam_deg: f64,
    pub range: f64,
}

impl Default for SeekerConfig {
    fn default() -> Self {
        Self {
            interval_s: 2.0,
            beam_deg: 40.0,
            range: 1500.0,
        }
    }
}

/// 魚雷の性能パラメータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TorpedoConfig {
    pub speed: f64,
    pub turn_rate_deg_s: f64,
    pub depth_rate_m_s: f64,
    pub blast_radius: f64,
    pub lifetime_s: f64,
    pub default_wire: f64,
    /// 発射点からの最大航走距離 [m]
    pub max_range: f64,
    /// 近接信管の作動半径 [m]（0で無効）
    pub proximity_fuze_m: f64,
    pub arming_delay_s: f64,
    /// 艦中心から発射管口までの前方オフセット [m]
    pub nose_offset_m: f64,
    pub tube_spacing_m: f64,
    pub max_tube_index: i32,
    pub seeker: SeekerConfig,
}

impl Default for TorpedoConfig {
    fn default() -> Self {
        Self {
            speed: 12.0,
            turn_rate_deg_s: 30.0,
            depth_rate_m_s: 6.0,
            blast_radius: 60.0,
            lifetime_s: 240.0,
            default_wire: 600.0,
            max_range: 5000.0,
            proximity_fuze_m: 15.0,
            arming_delay_s: 1.0,
            nose_offset_m: 12.0,
            tube_spacing_m: 2.0,
            max_tube_index: 2,
            seeker: SeekerConfig::default(),
        }
    }
}

/// パッシブソナー
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PassiveSonarConfig {
    pub base_snr: f64,
    pub speed_noise_gain: f64,
    pub snorkel_bonus: f64,
    /// 浅深度目標の方位ジッタ半幅 [deg]
    pub bearing_jitter_deg: f64,
    /// 深深度目標の方位ジッタ半幅 [deg]
    pub deep_bearing_jitter_deg: f64,
    pub shallow_depth_m: f64,
    /// これ未満のSNRは検知しない
    pub detection_floor: f64,
    /// 報告間隔の範囲 [s]
    pub report_interval_s: [f64; 2],
    pub short_range_m: f64,
    pub medium_range_m: f64,
}

impl Default for PassiveSonarConfig {
    fn default() -> Self {
        Self {
            base_snr: 8.0,
            speed_noise_gain: 0.6,
            snorkel_bonus: 8.0,
            bearing_jitter_deg: 3.0,
            deep_bearing_jitter_deg: 1.0,
            shallow_depth_m: 50.0,
            detection_floor: 5.0,
            report_interval_s: [2.0, 4.0],
            short_range_m: 1200.0,
            medium_range_m: 3000.0,
        }
    }
}

/// アクティブソナー
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActiveSonarConfig {
    pub max_range: f64,
    pub sound_speed: f64,
    pub rng_sigma_m: f64,
    pub brg_sigma_deg: f64,
    pub default_beam_deg: f64,
}

impl Default for ActiveSonarConfig {
    fn default() -> Self {
        Self {
            max_range: 6000.0,
            sound_speed: 1500.0,
            rng_sigma_m: 40.0,
            brg_sigma_deg: 1.5,
            default_beam_deg: 20.0,
        }
    }
}

/// ピンの電力コスト
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivePowerConfig {
    pub cost_per_ping: f64,
    pub cost_per_degree: f64,
    pub min_battery: f64,
    pub cooldown_s: f64,
}

impl Default for ActivePowerConfig {
    fn default() -> Self {
        Self {
            cost_per_ping: 1.0,
            cost_per_degree: 0.01,
            min_battery: 5.0,
            cooldown_s: 5.0,
        }
    }
}

/// 第三者によるピン探知モデル
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PingExposureConfig {
    pub gain: f64,
    pub reference_beam_deg: f64,
    pub falloff_m: f64,
    pub threshold: f64,
}

impl Default for PingExposureConfig {
    fn default() -> Self {
        Self {
            gain: 5.0,
            reference_beam_deg: 90.0,
            falloff_m: 800.0,
            threshold: 1.0,
        }
    }
}

/// ソナー設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SonarConfig {
    pub passive: PassiveSonarConfig,
    pub active: ActiveSonarConfig,
    pub active_power: ActivePowerConfig,
    pub ping_exposure: PingExposureConfig,
}

/// 送信キューが満杯のときの破棄方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 新しいイベントを捨てる
    DropNewest,
    /// 最も古いイベントを捨てて新しいものを入れる
    DropOldest,
}

/// イベント配信設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    /// 無通信時にキープアライブを送るまでの時間 [s]
    pub keepalive_s: f64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            overflow: OverflowPolicy::DropNewest,
            keepalive_s: 15.0,
        }
    }
}

/// 永続化設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// YAMLイメージの保存先（未指定で永続化なし）
    pub path: Option<String>,
}

/// 完全なゲーム設定
///
/// すべての節にデフォルト値があるため、部分的なYAMLはデフォルトに上書きマージされます。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GameConfig {
    pub meta: ConfigMeta,
    pub sim: SimulationConfig,
    pub world: WorldConfig,
    pub sub: SubmarineConfig,
    pub torpedo: TorpedoConfig,
    pub sonar: SonarConfig,
    pub fanout: FanoutConfig,
    pub persistence: PersistenceConfig,
}

impl GameConfig {
    /// YAMLファイルからゲーム設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: GameConfig = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;

        Ok(config)
    }

    /// YAML文字列から読み込み（テスト・埋め込み用）
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 公称ティック周期 [s]
    pub fn tick_period_s(&self) -> f64 {
        1.0 / self.sim.tick_hz
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Validation(format!("{} must be positive, got {}", name, value)))
            }
        }
        fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Validation(format!("{} must not be negative, got {}", name, value)))
            }
        }
        fn ordered(name: &str, lo: f64, hi: f64) -> Result<(), ConfigError> {
            if lo.is_finite() && hi.is_finite() && lo <= hi {
                Ok(())
            } else {
                Err(ConfigError::Validation(format!("{} range is invalid: [{}, {}]", name, lo, hi)))
            }
        }

        // 時間設定
        positive("sim.tick_hz", self.sim.tick_hz)?;
        positive("sim.max_dt_s", self.sim.max_dt_s)?;
        positive("sim.snapshot_interval_s", self.sim.snapshot_interval_s)?;

        // 出現範囲
        positive("world.ring.r", self.world.ring.r)?;
        ordered("world.spawn_r", self.world.spawn_min_r, self.world.spawn_max_r)?;
        ordered("world.spawn_depth_m", self.world.spawn_depth_m[0], self.world.spawn_depth_m[1])?;
        if self.world.spawn_attempts == 0 {
            return Err(ConfigError::Validation("world.spawn_attempts must be at least 1".to_string()));
        }

        // 潜水艦
        let sub = &self.sub;
        positive("sub.max_speed", sub.max_speed)?;
        positive("sub.max_rudder_deg", sub.max_rudder_deg)?;
        positive("sub.rudder_rate_deg_s", sub.rudder_rate_deg_s)?;
        positive("sub.pitch_rate_deg_s", sub.pitch_rate_deg_s)?;
        positive("sub.emergency_blow.duration_s", sub.emergency_blow.duration_s)?;
        ordered("sub.battery.initial", sub.battery.initial_min, sub.battery.initial_max)?;
        if sub.battery.initial_min < 0.0 || sub.battery.initial_max > 100.0 {
            return Err(ConfigError::Validation("sub.battery.initial must lie within 0..100".to_string()));
        }

        // 魚雷
        positive("torpedo.speed", self.torpedo.speed)?;
        positive("torpedo.blast_radius", self.torpedo.blast_radius)?;
        positive("torpedo.max_range", self.torpedo.max_range)?;
        positive("torpedo.seeker.interval_s", self.torpedo.seeker.interval_s)?;
        if self.torpedo.max_tube_index < 0 {
            return Err(ConfigError::Validation("torpedo.max_tube_index must not be negative".to_string()));
        }

        // ソナー
        let passive = &self.sonar.passive;
        ordered("sonar.passive.report_interval_s", passive.report_interval_s[0], passive.report_interval_s[1])?;
        ordered("sonar.passive.range classes", passive.short_range_m, passive.medium_range_m)?;
        non_negative("sonar.passive.bearing_jitter_deg", passive.bearing_jitter_deg)?;
        non_negative("sonar.passive.deep_bearing_jitter_deg", passive.deep_bearing_jitter_deg)?;
        non_negative("sonar.active.brg_sigma_deg", self.sonar.active.brg_sigma_deg)?;
        non_negative("sonar.active.rng_sigma_m", self.sonar.active.rng_sigma_m)?;
        positive("sonar.active.sound_speed", self.sonar.active.sound_speed)?;
        positive("sonar.active.max_range", self.sonar.active.max_range)?;
        positive("sonar.ping_exposure.reference_beam_deg", self.sonar.ping_exposure.reference_beam_deg)?;
        positive("sonar.ping_exposure.falloff_m", self.sonar.ping_exposure.falloff_m)?;

        // 配信
        if self.fanout.capacity == 0 {
            return Err(ConfigError::Validation("fanout.capacity must be at least 1".to_string()));
        }
        positive("fanout.keepalive_s", self.fanout.keepalive_s)?;

        Ok(())
    }

    /// 設定の概要を表示
    pub fn print_summary(&self) {
        println!("=== ルール情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("ティック周波数: {:.1}Hz (最大Δt {:.3}秒)", self.sim.tick_hz, self.sim.max_dt_s);
        match self.sim.seed {
            Some(seed) => println!("シード値: {}", seed),
            None => println!("シード値: (OSエントロピー)"),
        }
        println!("スナップショット間隔: {:.1}秒", self.sim.snapshot_interval_s);
        println!();

        println!("=== 海域 ===");
        println!(
            "リング中心: ({:.0}, {:.0}) 半径: {:.0}m",
            self.world.ring.x, self.world.ring.y, self.world.ring.r
        );
        println!(
            "出現半径: {:.0}〜{:.0}m (離隔 {:.0}m)",
            self.world.spawn_min_r, self.world.spawn_max_r, self.world.safe_spawn_separation
        );
        println!();

        println!("=== 潜水艦 ===");
        println!("最大速力: {:.1}m/s", self.sub.max_speed);
        println!("圧壊深度: {:.0}m", self.sub.crush_depth);
        println!("シュノーケル深度: {:.0}m", self.sub.snorkel_depth);
        println!();

        println!("=== 魚雷 ===");
        println!("速力: {:.1}m/s 最大射程: {:.0}m", self.torpedo.speed, self.torpedo.max_range);
        println!("有線長(既定): {:.0}m 爆発半径: {:.0}m", self.torpedo.default_wire, self.torpedo.blast_radius);
        println!();

        println!("=== ソナー ===");
        println!(
            "パッシブ報告間隔: {:.1}〜{:.1}秒",
            self.sonar.passive.report_interval_s[0], self.sonar.passive.report_interval_s[1]
        );
        println!(
            "アクティブ最大探知距離: {:.0}m 音速: {:.0}m/s",
            self.sonar.active.max_range, self.sonar.active.sound_speed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.tick_period_s() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_partial_yaml_merges_over_defaults() {
        let yaml = r#"
sim:
  tick_hz: 20
sub:
  battery:
    initial_min: 90
    initial_max: 95
fanout:
  overflow: drop_oldest
"#;
        let config = GameConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.sim.tick_hz, 20.0);
        assert_eq!(config.sim.max_dt_s, 0.25);
        assert_eq!(config.sub.battery.initial_min, 90.0);
        assert_eq!(config.sub.battery.drain_per_throttle_per_s, 0.02);
        assert_eq!(config.sub.max_speed, 6.0);
        assert_eq!(config.fanout.overflow, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let mut config = GameConfig::default();
        config.sonar.passive.report_interval_s = [4.0, 2.0];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = GameConfig::default();
        config.sim.tick_hz = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_negative_noise() {
        let mut config = GameConfig::default();
        config.sonar.passive.deep_bearing_jitter_deg = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = GameConfig::default();
        config.sonar.active.rng_sigma_m = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = GameConfig::default();
        config.sonar.passive.bearing_jitter_deg = 0.0;
        config.sonar.active.brg_sigma_deg = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = GameConfig::from_file("/nonexistent/subsim.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
