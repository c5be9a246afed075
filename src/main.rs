use clap::Parser;
use qgs_batch::utils::logger;
use qgs_batch::{AlgorithmRunner, BatchError, CliConfig, ProcessRunner, SettingsStore, TracingFeedback};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn exit_with(e: &BatchError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    std::process::exit(e.exit_code())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.log_json {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("🚀 Starting qgs-batch");
    tracing::info!("📁 Settings file: {}", config.settings.display());

    let mut store = match SettingsStore::load(&config.settings) {
        Ok(store) => store,
        Err(e) => exit_with(&e),
    };

    // 命令列 > 設定檔 > 預設值
    let operation = match config.command.resolve(&mut store) {
        Ok(operation) => operation,
        Err(e) => exit_with(&e),
    };
    if let Err(e) = store.save() {
        tracing::warn!("⚠️ Could not save the settings to {}: {}", store.path().display(), e);
    }

    if config.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let feedback = Arc::new(TracingFeedback::new());
    let cancel = feedback.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⚠️ Cancel requested, stopping after the current item");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let algorithm = operation.into_algorithm(ProcessRunner);
    let runner = AlgorithmRunner::new_with_monitoring(algorithm, config.monitor);
    let task_feedback = Arc::clone(&feedback);
    let result = tokio::task::spawn_blocking(move || runner.run(&*task_feedback)).await?;

    match result {
        Ok(output) => {
            tracing::info!("✅ Completed successfully");
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Err(e) => {
            let exit_code = e.exit_code();
            if exit_code > 0 {
                exit_with(&e);
            }
            tracing::info!("🛑 {}", e.user_friendly_message());
        }
    }

    Ok(())
}
