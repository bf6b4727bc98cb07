//! CLI entry: single-shot with a query argument, interactive loop without.
//!
//! Exit codes: 0 on success, 1 on internal error, 2 on usage error (clap's
//! default for argument failures).

use std::io::{BufRead, Write};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use josa_rag::{AgentConfig, AgentEngine};

#[derive(Parser)]
#[command(
    name = "josa",
    about = "Korean tax-audit case QA over hybrid retrieval",
    version
)]
struct Cli {
    /// The question to answer; omit to start the interactive loop.
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = AgentConfig::from_env();
    let engine = match AgentEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("초기화 실패: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let result = if cli.query.is_empty() {
        interactive(&engine).await
    } else {
        let query = cli.query.join(" ");
        if query.trim().is_empty() {
            eprintln!("사용법: josa [질문]");
            return ExitCode::from(2);
        }
        single_shot(&engine, &query).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("오류 발생: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn single_shot(engine: &AgentEngine, query: &str) -> Result<()> {
    let answer = engine.run_query(query).await?;
    println!("{}", answer);
    Ok(())
}

async fn interactive(engine: &AgentEngine) -> Result<()> {
    println!("세무조사 사례 QA 에이전트 (종료: exit / quit / 종료)");

    let stdin = std::io::stdin();
    loop {
        print!("질문> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit" | "종료") {
            break;
        }

        match engine.run_query(query).await {
            Ok(answer) => println!("\n{}\n", answer),
            Err(e) => tracing::error!(error = %e, "질의 처리 실패"),
        }
    }

    println!("종료합니다.");
    Ok(())
}
