//! 采集进程入口：轮询现场设备，按 COV 规则把读数写入按点位分表的历史存储。

mod collector;

use collector::{BoxError, Collector};
use ems_config::AppConfig;
use ems_telemetry::{init_tracing, metrics};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let mut collector = Collector::build(&config).await?;
    collector.reconcile().await;

    let scheduler = collector.scheduler.clone();
    collector.spawn_retention(scheduler.cancellation_token());

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    info!(target: "ems.collector", "shutdown_requested");
    scheduler.shutdown();
    run.await?;
    scheduler.drain().await;
    collector.drain_background().await;

    let snapshot = metrics().snapshot();
    info!(
        target: "ems.collector",
        polls_completed = snapshot.polls_completed,
        samples_logged = snapshot.samples_logged,
        samples_suppressed = snapshot.samples_suppressed,
        write_failures = snapshot.write_failures,
        "collector_stopped"
    );
    Ok(())
}
