//! Pathfinder 命令行入口
//!
//! 初始化日志与配置，创建模型客户端，运行所选流水线；步骤事件按 JSON 行写到 stdout，
//! 最终报告以 JSON 输出。Ctrl-C 取消当前运行。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pathfinder::config::{create_model_client, load_config, AppConfig};
use pathfinder::memory::Message;
use pathfinder::observability;
use pathfinder::pipelines::{
    run_brand_pipeline, run_evidence_icp, run_simulation, run_social_icp, stream_chat, BrandPrompts,
    ChatRequest, CreatorHints, EvidenceIcpRequest, PipelineContext, ResearchDepth, SimulationRequest,
    SocialIcpRequest,
};
use pathfinder::steps::StepEvent;

#[derive(Parser, Debug)]
#[command(name = "pathfinder", version, about = "Marketing research agent pipelines")]
struct Cli {
    /// 配置文件（TOML）
    #[arg(long, env = "PATHFINDER_CONFIG")]
    config: Option<PathBuf>,

    /// 结构化 JSON 日志
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 模拟画像的三阶段搜索旅程
    Simulate {
        #[arg(long)]
        persona: String,
        #[arg(long)]
        query: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// 从社交主页生成 ICP（v1）
    SocialIcp {
        #[arg(long)]
        url: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// 基于证据的 ICP（v2）
    EvidenceIcp {
        /// 可重复；第一个是主页面
        #[arg(long = "url", required = true)]
        urls: Vec<String>,
        #[arg(long = "article")]
        articles: Vec<String>,
        #[arg(long)]
        creator_name: Option<String>,
        #[arg(long)]
        niche: Option<String>,
        #[arg(long, default_value = "standard")]
        depth: ResearchDepth,
        #[arg(long)]
        model: Option<String>,
    },
    /// 品牌分析 -> 主题 / ICP -> 分阶段查询
    Brand {
        #[arg(long)]
        url: String,
    },
    /// 单轮流式对话
    Chat {
        message: String,
        #[arg(long)]
        web_search: bool,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init(cli.json_logs);

    let config = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });
    let model = create_model_client(&config);

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            ctrl_c_token.cancel();
        }
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StepEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize step event"),
            }
        }
    });

    let ctx = PipelineContext::new(model.as_ref(), &config, token).with_event_tx(&event_tx);
    let outcome = run_command(&ctx, cli.command).await;

    drop(ctx);
    drop(event_tx);
    printer.await.context("event printer task failed")?;
    outcome
}

async fn run_command(ctx: &PipelineContext<'_>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Simulate { persona, query, model } => {
            let report = run_simulation(
                ctx,
                SimulationRequest {
                    persona,
                    initial_query: query,
                    messages: Vec::new(),
                    model,
                },
            )
            .await
            .context("simulation failed")?;
            print_json(&report)
        }
        Command::SocialIcp { url, model } => {
            let report = run_social_icp(
                ctx,
                SocialIcpRequest {
                    profile_url: url,
                    messages: Vec::new(),
                    model,
                },
            )
            .await
            .context("social icp failed")?;
            print_json(&report)
        }
        Command::EvidenceIcp {
            urls,
            articles,
            creator_name,
            niche,
            depth,
            model,
        } => {
            let report = run_evidence_icp(
                ctx,
                EvidenceIcpRequest {
                    profile_urls: urls,
                    article_urls: articles,
                    hints: CreatorHints {
                        creator_name,
                        known_niche: niche,
                    },
                    depth,
                    messages: Vec::new(),
                    model,
                },
            )
            .await
            .context("evidence icp failed")?;
            print_json(&report)
        }
        Command::Brand { url } => {
            let result = run_brand_pipeline(ctx, &url, BrandPrompts::default())
                .await
                .context("brand pipeline failed")?;
            print_json(&result)
        }
        Command::Chat {
            message,
            web_search,
            model,
        } => {
            let mut stream = stream_chat(
                ctx,
                ChatRequest {
                    messages: vec![Message::user(message)],
                    web_search,
                    model,
                },
            )
            .await
            .context("chat failed")?;
            let mut stdout = std::io::stdout();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.context("chat stream failed")?;
                stdout.write_all(chunk.as_bytes())?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    println!("{text}");
    Ok(())
}
