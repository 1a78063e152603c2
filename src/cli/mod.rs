//! Command-line interface parsing and handling

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::net::TcpListener;

use crate::core::app::{bootstrap, App};
use crate::core::config::Config;
use crate::core::dispatch::{ChatMode, ChatRequestContext};
use crate::core::message::{UiMessage, ROLE_USER};
use crate::core::ui_stream::{encode_event, DONE_FRAME};
use crate::logging::init_tracing;
use crate::server::{serve, shutdown_signal};

#[derive(Parser, Debug)]
#[command(name = "switchboard", version)]
#[command(about = "Chat gateway that streams LLM answers with remote MCP tools")]
#[command(
    long_about = "Switchboard serves a streaming chat endpoint in front of OpenAI-compatible \
providers and an optional hosted chatbot. Tools from remote MCP servers (streamable HTTP or SSE) \
are discovered per request and merged with tools supplied by the client.\n\n\
Configuration:\n\
  --config <PATH>, SWITCHBOARD_CONFIG, or the platform config directory (config.toml)\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    API key for the default provider (each provider names its own variable)\n\
  RUST_LOG          Overrides --log-level"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Serve the chat API (default)
    Serve {
        /// Address to listen on, overriding the configured one
        #[arg(short = 'b', long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Print the merged tool catalog
    Tools,
    /// Send one message and print the event stream
    Ask {
        /// Provider to use
        #[arg(short = 'p', long)]
        provider: Option<String>,
        /// Model to use
        #[arg(short = 'm', long)]
        model: Option<String>,
        /// Ask the hosted chatbot instead of an LLM
        #[arg(long)]
        chatbot: bool,
        /// Require at least one tool call before answering
        #[arg(long)]
        force_tools: bool,
        /// The message
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    init_tracing(args.log_level.as_deref().or(config.log_level.as_deref()));

    let command = args.command.unwrap_or(Commands::Serve { bind: None });
    let app = bootstrap(config).await?;
    let result = match command {
        Commands::Serve { bind } => run_server(&app, bind).await,
        Commands::Tools => print_tools(&app).await,
        Commands::Ask {
            provider,
            model,
            chatbot,
            force_tools,
            text,
        } => {
            let context = ChatRequestContext {
                messages: vec![UiMessage::text_message(ROLE_USER, text.join(" "))],
                provider,
                model,
                force_tool_use: force_tools,
                mode: if chatbot { ChatMode::Chatbot } else { ChatMode::Llm },
                ..ChatRequestContext::default()
            };
            ask(&app, context).await
        }
    };
    app.shutdown().await;
    result
}

async fn run_server(app: &App, bind: Option<String>) -> Result<(), Box<dyn Error>> {
    let addr = bind.unwrap_or_else(|| app.config.server.bind_address().to_string());
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, app.state(), shutdown_signal()).await?;
    Ok(())
}

async fn print_tools(app: &App) -> Result<(), Box<dyn Error>> {
    let tools = app.dispatcher.resolve_tools(Default::default()).await;
    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }
    for (name, tool) in &tools {
        match tool.description.as_deref() {
            Some(description) => println!("{name} - {description}"),
            None => println!("{name}"),
        }
    }
    Ok(())
}

async fn ask(app: &App, context: ChatRequestContext) -> Result<(), Box<dyn Error>> {
    let mut events = app.dispatcher.dispatch(context).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        stdout.write_all(encode_event(&event).as_bytes())?;
        stdout.flush()?;
    }
    stdout.write_all(DONE_FRAME.as_bytes())?;
    Ok(())
}
