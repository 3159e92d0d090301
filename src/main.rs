use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use subsim::clock::SystemClock;
use subsim::config::GameConfig;
use subsim::fanout::Subscription;
use subsim::logging::{init_logging, level_for_verbosity, parse_log_level, LogConfig, LogOutput};
use subsim::persistence::{NoPersistence, WorldPersistence, YamlFilePersistence};
use subsim::{ControlInput, DepthOrder, SimulationEngine};

fn main() {
    let matches = Command::new("subsim")
        .version("0.1.0")
        .about("潜水艦戦シミュレーション (Submarine Simulation)")
        .long_about(
            "リアルタイム多人数潜水艦戦のシミュレーションサーバー\n\
             固定周期のティックでワールドを進め、所有者ごとにイベントを配信します。",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("ゲームルールファイル(.yaml)のパスを指定")
                .long_help(
                    "ゲームルールファイル(.yaml)のパスを指定します。\n\
                     指定しない場合、既定のルールで実行されます。",
                ),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("ルールの情報のみ表示して終了"),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .value_name("N")
                .value_parser(clap::value_parser!(u64))
                .default_value("2")
                .help("デモで出現させる所有者数"),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(f64))
                .default_value("10")
                .help("実行時間（秒）"),
        )
        .arg(
            Arg::new("persist")
                .long("persist")
                .value_name("FILE")
                .help("ワールドの永続化ファイル（ルールファイルの指定より優先）"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: DEBUG, -vv: TRACE)"),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => match GameConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        },
        None => GameConfig::default(),
    };

    if matches.get_flag("info") {
        config.print_summary();
        return;
    }

    let output = match matches.get_one::<String>("log-output").map(|s| LogOutput::from_str(s)) {
        Some(Ok(output)) => output,
        Some(Err(e)) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
        None => LogOutput::Console,
    };
    let base_level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or(tracing::Level::INFO);
    let log_config = LogConfig {
        level: level_for_verbosity(base_level, matches.get_count("verbose")),
        output,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: ログ初期化に失敗: {}", e);
            std::process::exit(1);
        }
    };

    let owners = matches.get_one::<u64>("demo").copied().unwrap_or(2);
    let duration = matches.get_one::<f64>("duration").copied().unwrap_or(10.0);
    let persist_path = matches
        .get_one::<String>("persist")
        .cloned()
        .or_else(|| config.persistence.path.clone());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("エラー: ランタイム初期化に失敗: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_demo(config, persist_path, owners, duration)) {
        error!(error = %e, "デモ実行エラー");
        std::process::exit(1);
    }
}

/// ヘッドレスのデモ対戦
///
/// 所有者ごとに1隻を出現させ、指定時間だけティックループを回して
/// 各所有者が受け取ったイベント数を表示します。
async fn run_demo(
    config: GameConfig,
    persist_path: Option<String>,
    owners: u64,
    duration: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let persistence: Box<dyn WorldPersistence> = match persist_path {
        Some(path) => Box::new(YamlFilePersistence::new(path)),
        None => Box::new(NoPersistence),
    };
    let engine = SimulationEngine::new(config, Arc::new(SystemClock), persistence)?;
    info!(
        tick_hz = engine.config().sim.tick_hz,
        owners,
        duration_s = duration,
        "SERVER_STARTED: シミュレーション開始"
    );

    for owner in 1..=owners {
        let receipt = engine.spawn_submarine(owner)?;
        let input = ControlInput {
            throttle: Some(0.5),
            target_depth: DepthOrder::Set(120.0),
            rudder_deg: Some(if owner % 2 == 0 { 5.0 } else { -5.0 }),
            ..Default::default()
        };
        engine.set_controls(owner, receipt.sub_id, input)?;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let listeners: Vec<_> = (1..=owners)
        .map(|owner| tokio::spawn(listen(engine.subscribe(owner), stop_rx.clone())))
        .collect();

    let ticker = engine.spawn_tick_loop();
    tokio::time::sleep(Duration::from_secs_f64(duration.max(0.0))).await;
    ticker.shutdown().await;
    let _ = stop_tx.send(true);

    println!();
    println!("=== 結果 ===");
    for (owner, listener) in (1..=owners).zip(listeners) {
        let counts = listener.await.unwrap_or_else(|e| {
            warn!(owner, error = %e, "購読タスク異常終了");
            EventCounts::default()
        });
        let state = engine.state(owner);
        println!(
            "所有者 {}: 艦 {} 隻, 魚雷 {} 本, 受信 {} 件 (探知 {}, 反響 {}, 爆発 {}), 破棄 {} 件",
            owner,
            state.subs.len(),
            state.torpedoes.len(),
            counts.total,
            counts.contacts,
            counts.echoes,
            counts.explosions,
            engine.hub().dropped(owner)
        );
        engine.hub().unsubscribe(owner);
    }

    info!("SERVER_STOPPED: シミュレーション終了");
    Ok(())
}

#[derive(Debug, Default)]
struct EventCounts {
    total: usize,
    contacts: usize,
    echoes: usize,
    explosions: usize,
}

/// 停止通知まで購読ストリームを読み続ける
async fn listen(subscription: Subscription, mut stop: watch::Receiver<bool>) -> EventCounts {
    let mut counts = EventCounts::default();
    loop {
        let frame = tokio::select! {
            frame = subscription.next() => frame,
            _ = stop.changed() => break,
        };
        match frame.event {
            "keepalive" => continue,
            "contact" => counts.contacts += 1,
            "echo" => counts.echoes += 1,
            "explosion" => counts.explosions += 1,
            _ => {}
        }
        counts.total += 1;
        debug!(owner = subscription.owner(), event = frame.event, data = %frame.data, "受信");
    }
    counts
}
