//! `ask`: publish a request, wait for the answer, print it for the agent.
//!
//! Output on success:
//!
//! ```text
//! <content>
//!
//! --- FEEDBACK_JSON ---
//! {"content":"...","images":[...],"timestamp":"...","success":true,...}
//! --- END_FEEDBACK ---
//! ```

use clap::Args;
use loop_core::{LoopConfig, NewRequest, Producer, Request, StorageConfig};
use serde::Serialize;
use std::io::{self, Read};
use std::time::Duration;

use crate::signals;

const JSON_START: &str = "--- FEEDBACK_JSON ---";
const JSON_END: &str = "--- END_FEEDBACK ---";

#[derive(Args, Debug, Default)]
pub struct AskArgs {
    /// Project directory the request is about (defaults to the current directory)
    #[arg(short = 'p', long)]
    pub project: Option<String>,

    /// Prompt text shown to the human
    #[arg(short = 's', long)]
    pub summary: Option<String>,

    /// Conversation id; keeps a whole conversation on one listener
    #[arg(short = 'i', long)]
    pub session_id: Option<String>,

    /// Agent id, used when no session id is known
    #[arg(short = 'a', long)]
    pub agent_id: Option<String>,

    #[arg(short = 'm', long)]
    pub model: Option<String>,

    #[arg(short = 't', long)]
    pub title: Option<String>,

    /// Quick replies, comma separated (e.g. "continue,retry,stop")
    #[arg(short = 'o', long)]
    pub options: Option<String>,

    /// Read the request as JSON from stdin (for long summaries)
    #[arg(long)]
    pub stdin: bool,

    /// Give up after this many seconds (waits forever by default)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// The block printed between the feedback markers.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FeedbackReport {
    content: String,
    images: Vec<String>,
    timestamp: String,
    success: bool,
    model: String,
    session_id: String,
    title: String,
    agent_id: String,
}

impl From<&Request> for FeedbackReport {
    fn from(answer: &Request) -> Self {
        FeedbackReport {
            content: answer.content.clone().unwrap_or_default(),
            images: answer.images.clone(),
            timestamp: answer
                .timestamp
                .unwrap_or_else(chrono::Utc::now)
                .to_rfc3339(),
            success: true,
            model: answer.model.clone().unwrap_or_default(),
            session_id: answer.session_id.clone().unwrap_or_default(),
            title: answer.title.clone().unwrap_or_default(),
            agent_id: answer.agent_id.clone().unwrap_or_default(),
        }
    }
}

pub fn run(storage: &StorageConfig, config: &LoopConfig, args: AskArgs) -> Result<(), String> {
    let timeout = args.timeout.filter(|secs| *secs > 0).map(Duration::from_secs);
    let new_request = if args.stdin {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| format!("Failed to read stdin: {}", e))?;
        from_stdin_json(&input, args)?
    } else {
        from_flags(args)
    };
    let new_request = with_default_project(new_request);

    let producer = Producer::new(storage.clone(), config.response_poll_interval());
    let request = producer.publish(new_request)?;
    eprintln!(
        "Waiting for feedback [{}]; answer it in a listening editor or terminal",
        short_id(&request.id)
    );

    let cancel = signals::install();
    let waited = producer.wait_for_response(&request.id, timeout, cancel);
    if let Err(e) = producer.cleanup(&request.id) {
        tracing::warn!(request_id = %request.id, error = %e, "Failed to clean up request");
    }

    match waited? {
        Some(answer) => {
            print!("{}", render(&answer)?);
            Ok(())
        }
        None if signals::interrupted() => Err("Cancelled".to_string()),
        None => Err("Timed out waiting for feedback".to_string()),
    }
}

fn from_flags(args: AskArgs) -> NewRequest {
    NewRequest {
        project: args.project,
        summary: args.summary,
        session_id: args.session_id,
        agent_id: args.agent_id,
        model: args.model,
        title: args.title,
        options: args.options.as_deref().map(split_options).unwrap_or_default(),
    }
}

/// Stdin JSON wins; flags fill fields it leaves out.
fn from_stdin_json(input: &str, args: AskArgs) -> Result<NewRequest, String> {
    let parsed: NewRequest =
        serde_json::from_str(input).map_err(|e| format!("Failed to parse stdin JSON: {}", e))?;
    let flags = from_flags(args);
    Ok(NewRequest {
        project: parsed.project.or(flags.project),
        summary: parsed.summary.or(flags.summary),
        session_id: parsed.session_id.or(flags.session_id),
        agent_id: parsed.agent_id.or(flags.agent_id),
        model: parsed.model.or(flags.model),
        title: parsed.title.or(flags.title),
        options: if parsed.options.is_empty() {
            flags.options
        } else {
            parsed.options
        },
    })
}

fn with_default_project(mut request: NewRequest) -> NewRequest {
    let blank = request
        .project
        .as_deref()
        .map_or(true, |project| project.trim().is_empty());
    if blank {
        request.project = std::env::current_dir()
            .ok()
            .map(|dir| dir.to_string_lossy().into_owned());
    }
    request
}

fn split_options(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect()
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn render(answer: &Request) -> Result<String, String> {
    let report = FeedbackReport::from(answer);
    let json = serde_json::to_string(&report)
        .map_err(|e| format!("Failed to serialize feedback: {}", e))?;
    Ok(format!(
        "{}\n\n{}\n{}\n{}\n",
        report.content, JSON_START, json, JSON_END
    ))
}
