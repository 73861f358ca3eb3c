use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use atelier_contracts::assets::ImageAsset;
use atelier_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use atelier_contracts::events::{now_utc_iso, EventWriter};
use atelier_contracts::runs::{
    build_receipt, write_receipt, write_summary, ReceiptInput, ResultInfo, SessionSummary,
};
use atelier_contracts::selection::{BackgroundOption, FitOption, PoseOption, MAX_GARMENTS};
use atelier_engine::default_backend_registry;
use atelier_engine::prompts::{BACKGROUND_PRESETS, SURPRISE_PROMPTS};
use atelier_engine::studio::{GenerationOutcome, Studio, StudioConfig, StudioError, SuggestionJob};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(name = "atelier-rs", version, about = "Atelier virtual try-on CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    text_model: Option<String>,
    /// Seconds before a remote call is abandoned (clamped to 15..=300).
    #[arg(long)]
    request_timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    person: PathBuf,
    #[arg(long = "garment")]
    garments: Vec<PathBuf>,
    #[arg(long)]
    pose: Option<String>,
    #[arg(long)]
    pose_text: Option<String>,
    #[arg(long)]
    fit: Option<String>,
    #[arg(long)]
    background: Option<String>,
    #[arg(long)]
    background_text: Option<String>,
    #[arg(long)]
    edit: Option<String>,
    #[arg(long)]
    enhance: bool,
}

const WELCOME_MESSAGE: &str = "Welcome to Atelier. Load a photo with /person PATH, add outfits with /garments PATH..., then /generate.";

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_try_on(args),
    }
}

/// A studio plus the run directory its artifacts, receipts and summary land in.
struct StudioSession {
    studio: Studio,
    out_dir: PathBuf,
    started_at: String,
    artifacts: Vec<String>,
    suggestion_job: Option<SuggestionJob>,
}

impl StudioSession {
    fn open(args: &SessionArgs) -> Result<Self> {
        fs::create_dir_all(&args.out)
            .with_context(|| format!("failed to create {}", args.out.display()))?;
        let events_path = args
            .events
            .clone()
            .unwrap_or_else(|| args.out.join("events.jsonl"));
        let events = EventWriter::with_new_session(events_path);
        let studio = Studio::new(
            events,
            &default_backend_registry(),
            StudioConfig {
                image_model: args.image_model.clone(),
                text_model: args.text_model.clone(),
                request_timeout_s: args.request_timeout,
            },
        )?;
        Ok(Self {
            studio,
            out_dir: args.out.clone(),
            started_at: now_utc_iso(),
            artifacts: Vec::new(),
            suggestion_job: None,
        })
    }

    fn model_warnings(&self) -> Vec<String> {
        [self.studio.image_model(), self.studio.text_model()]
            .into_iter()
            .filter_map(|selection| selection.fallback_reason.clone())
            .collect()
    }

    fn print_models(&self) {
        let image = self.studio.image_model();
        let text = self.studio.text_model();
        println!(
            "Image model: {} ({}), text model: {} ({})",
            image.model.name, image.model.provider, text.model.name, text.model.provider
        );
        for warning in self.model_warnings() {
            println!("Note: {warning}");
        }
    }

    /// Writes the image and its receipt; returns the image path.
    fn save_outcome(&mut self, outcome: &GenerationOutcome) -> Result<PathBuf> {
        let index = self.artifacts.len() + 1;
        let image_name = artifact_file_name(index, outcome.image.mime_type().extension());
        let image_path = self.out_dir.join(&image_name);
        let receipt_path = self.out_dir.join(receipt_file_name(index));
        fs::write(&image_path, outcome.image.bytes())
            .with_context(|| format!("failed writing {}", image_path.display()))?;

        let (width, height) = match outcome.image.dimensions() {
            Some((width, height)) => (Some(width), Some(height)),
            None => (None, None),
        };
        let result = ResultInfo {
            mime_type: outcome.image.mime_type().as_str().to_string(),
            bytes: outcome.image.len(),
            digest: outcome.image.digest(),
            width,
            height,
        };
        let selection = self.studio.selection();
        let metadata = json_object(json!({
            "session_id": self.studio.events().session_id(),
            "request_timeout_s": self.studio.request_timeout_s(),
            "selection": {
                "garments": selection.garments().len(),
                "pose": selection.pose().as_str(),
                "fit": selection.fit().as_str(),
                "background": selection.background().as_str(),
            },
        }));
        let warnings = self.model_warnings();
        let receipt = build_receipt(&ReceiptInput {
            request: &outcome.request,
            model: &outcome.model,
            provider: &outcome.provider,
            result: &result,
            history: outcome.history,
            warnings: &warnings,
            image_path: &image_path,
            receipt_path: &receipt_path,
            metadata: &metadata,
        });
        write_receipt(&receipt_path, &receipt)?;
        self.artifacts.push(image_name);
        Ok(image_path)
    }

    /// Joins an outstanding suggestion call, then writes `summary.json`.
    fn finish(&mut self) -> Result<PathBuf> {
        if let Some(job) = self.suggestion_job.take() {
            let _ = job.wait();
        }
        let stats = self.studio.stats();
        let history = self.studio.history_position();
        let summary = SessionSummary {
            session_id: self.studio.events().session_id().to_string(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_generations: stats.generations,
            total_enhancements: stats.enhancements,
            failed_operations: stats.failures,
            history_len: history.len,
            history_cursor: history.cursor,
            artifacts: self.artifacts.clone(),
        };
        let extra = json_object(json!({
            "image_model": self.studio.image_model().model.name,
            "text_model": self.studio.text_model().model.name,
        }));
        let path = self.out_dir.join("summary.json");
        write_summary(&path, &summary, Some(&extra))?;
        Ok(path)
    }
}

fn run_try_on(args: RunArgs) -> Result<i32> {
    let mut session = StudioSession::open(&args.session)?;
    session.print_models();
    let result = run_try_on_steps(&mut session, &args);
    let summary_path = session.finish()?;
    result?;
    println!("Summary written to {}", summary_path.display());
    Ok(0)
}

fn run_try_on_steps(session: &mut StudioSession, args: &RunArgs) -> Result<()> {
    let studio = &session.studio;
    studio.set_person(Some(ImageAsset::load(&args.person)?))?;
    let garments = args
        .garments
        .iter()
        .map(|path| ImageAsset::load(path))
        .collect::<Result<Vec<_>>>()?;
    studio.add_garments(garments)?;

    if let Some(pose) = args.pose.as_deref() {
        studio.set_pose(pose.parse::<PoseOption>()?);
    }
    if let Some(text) = args.pose_text.as_deref() {
        studio.set_custom_pose_text(text);
    }
    if let Some(fit) = args.fit.as_deref() {
        studio.set_fit(fit.parse::<FitOption>()?);
    }
    if let Some(background) = args.background.as_deref() {
        studio.set_background(background.parse::<BackgroundOption>()?);
    }
    if let Some(text) = non_empty(args.background_text.as_deref()) {
        studio.set_pending_background_edit(text)?;
    }
    if let Some(text) = non_empty(args.edit.as_deref()) {
        studio.set_pending_custom_edit(text)?;
    }

    let outcome = studio.build_and_generate(&print_progress)?;
    let path = session.save_outcome(&outcome)?;
    println!("Saved {}", path.display());

    // Waited on before enhancing: a new operation would discard the pending result.
    if let Some(job) = outcome.suggestions {
        let suggestions = job.wait().unwrap_or_default();
        print_suggestions(&suggestions);
    }

    if args.enhance {
        let outcome = session.studio.build_and_enhance(&print_progress)?;
        let path = session.save_outcome(&outcome)?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatFlow {
    Continue,
    Quit,
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = StudioSession::open(&args.session)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Atelier chat started. Type /help for commands.");
    if session.studio.take_welcome() {
        println!("{WELCOME_MESSAGE}");
    }
    session.print_models();

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }
        match handle_chat_intent(&mut session, &intent) {
            Ok(ChatFlow::Continue) => {}
            Ok(ChatFlow::Quit) => break,
            Err(err) => println!("Error: {err:#}"),
        }
    }

    let summary_path = session.finish()?;
    println!("Summary written to {}", summary_path.display());
    Ok(())
}

fn handle_chat_intent(session: &mut StudioSession, intent: &Intent) -> Result<ChatFlow> {
    let studio = &session.studio;
    match intent.action.as_str() {
        "help" => {
            println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
        }
        "quit" => return Ok(ChatFlow::Quit),
        "set_person" => {
            let path = intent.arg_str("path");
            if path.is_empty() {
                println!("/person requires a path");
                return Ok(ChatFlow::Continue);
            }
            let person = ImageAsset::load(Path::new(path))?;
            match studio.set_person(Some(person)) {
                Ok(()) => println!("Person photo loaded from {path}"),
                Err(err) => report_studio_error("Could not change the photo", &err),
            }
        }
        "add_garments" => {
            let paths = intent.arg_strings("paths");
            if paths.is_empty() {
                println!("/garments requires at least one path");
                return Ok(ChatFlow::Continue);
            }
            let garments = paths
                .iter()
                .map(|path| ImageAsset::load(Path::new(path)))
                .collect::<Result<Vec<_>>>()?;
            match studio.add_garments(garments) {
                Ok(true) => {
                    if let Err(err) = studio.reset_generation_state() {
                        report_studio_error("Could not restart from the photo", &err);
                    }
                    println!(
                        "Garments: {}/{MAX_GARMENTS}",
                        studio.selection().garments().len()
                    );
                }
                Ok(false) => println!("No garments added"),
                Err(err) => report_studio_error("Could not add garments", &err),
            }
        }
        "remove_garment" => {
            let Some(index) = one_based_index(intent) else {
                println!("/remove_garment requires a number starting at 1");
                return Ok(ChatFlow::Continue);
            };
            match studio.remove_garment(index) {
                Ok(_) => {
                    if let Err(err) = studio.reset_generation_state() {
                        report_studio_error("Could not restart from the photo", &err);
                    }
                    println!(
                        "Garment removed. Garments: {}/{MAX_GARMENTS}",
                        studio.selection().garments().len()
                    );
                }
                Err(err) => report_studio_error("Could not remove garment", &err),
            }
        }
        "set_pose" => {
            let raw = intent.arg_str("pose");
            if raw.is_empty() {
                println!("Pose: {}", studio.selection().pose());
                return Ok(ChatFlow::Continue);
            }
            let pose = raw.parse::<PoseOption>()?;
            studio.set_pose(pose);
            let text = intent.arg_str("text");
            if !text.is_empty() {
                studio.set_custom_pose_text(text);
            }
            if pose == PoseOption::Custom && studio.selection().custom_pose_text().is_empty() {
                println!("Pose set to custom. Describe it with /pose custom TEXT");
            } else {
                println!("Pose set to {pose}");
            }
        }
        "set_fit" => {
            let fit = intent.arg_str("text").parse::<FitOption>()?;
            studio.set_fit(fit);
            println!("Fit set to {fit}");
        }
        "set_background" => {
            let current_text = studio.current().background_edit_text().to_string();
            match intent.arg_str("mode") {
                "outfit" => {
                    studio.set_background(BackgroundOption::Outfit);
                    if !current_text.is_empty() {
                        studio.set_pending_background_edit("")?;
                    }
                    if studio.selection().has_garments() {
                        println!("Background will come from the outfit photo");
                    } else {
                        println!("Background set to outfit. Without garments the original background is kept");
                    }
                }
                "clear" => {
                    studio.set_background(BackgroundOption::Custom);
                    if !current_text.is_empty() {
                        studio.set_pending_background_edit("")?;
                    }
                    println!("Background edit cleared");
                }
                _ => {
                    let text = intent.arg_str("text");
                    studio.set_background(BackgroundOption::Custom);
                    studio.set_pending_background_edit(text)?;
                    println!("Background set to: {text}");
                }
            }
        }
        "set_custom_edit" => {
            let text = intent.arg_str("text");
            studio.set_pending_custom_edit(text)?;
            if text.is_empty() {
                println!("Edit cleared");
            } else {
                println!("Edit queued: {text}. Use /generate to apply");
            }
        }
        "generate" => match studio.build_and_generate(&print_progress) {
            Ok(mut outcome) => {
                let job = outcome.suggestions.take();
                let path = session.save_outcome(&outcome)?;
                println!("Saved {}", path.display());
                if job.is_some() {
                    println!("Fetching style suggestions. Use /suggestions to see them");
                }
                session.suggestion_job = job;
            }
            Err(err) => report_studio_error("Generation failed", &err),
        },
        "enhance" => match studio.build_and_enhance(&print_progress) {
            Ok(outcome) => {
                let path = session.save_outcome(&outcome)?;
                println!("Saved {}", path.display());
            }
            Err(err) => report_studio_error("Enhance failed", &err),
        },
        "undo" => match studio.undo() {
            Ok(true) => print_position(studio),
            Ok(false) => println!("Nothing to undo"),
            Err(err) => report_studio_error("Could not undo", &err),
        },
        "redo" => match studio.redo() {
            Ok(true) => print_position(studio),
            Ok(false) => println!("Nothing to redo"),
            Err(err) => report_studio_error("Could not redo", &err),
        },
        "show_suggestions" => {
            if studio.suggestions_pending() {
                println!("Style suggestions are still loading");
            } else {
                print_suggestions(&studio.suggestions());
            }
        }
        "apply_suggestion" => {
            let Some(index) = one_based_index(intent) else {
                println!("/apply requires a number starting at 1");
                return Ok(ChatFlow::Continue);
            };
            match studio.apply_suggestion(index) {
                Ok(text) => println!("Edit queued: {text}. Use /generate to apply"),
                Err(err) => report_studio_error("Could not apply suggestion", &err),
            }
        }
        "surprise" => {
            let prompt = surprise_prompt(clock_seed());
            studio.set_pending_custom_edit(prompt)?;
            println!("Edit queued: {prompt}. Use /generate to apply");
        }
        "background_presets" => {
            for (index, preset) in BACKGROUND_PRESETS.iter().enumerate() {
                println!("{}. {preset}", index + 1);
            }
            println!("Use /background TEXT to pick one");
        }
        "reset_generation" => match studio.reset_generation_state() {
            Ok(()) => println!("Restarted from the original photo"),
            Err(err) => report_studio_error("Could not reset", &err),
        },
        "start_over" => match studio.start_over() {
            Ok(()) => println!("Session cleared"),
            Err(err) => report_studio_error("Could not start over", &err),
        },
        "status" => print_status(session),
        "unknown" => {
            println!(
                "Unknown command /{}. Type /help for commands.",
                intent.arg_str("command")
            );
        }
        other => println!("Unhandled action: {other}"),
    }
    Ok(ChatFlow::Continue)
}

fn print_progress(message: &str) {
    println!("{message}");
}

fn report_studio_error(label: &str, err: &StudioError) {
    println!("{label}: {err}");
}

fn print_position(studio: &Studio) {
    let position = studio.history_position();
    println!("History {}/{}", position.cursor + 1, position.len);
}

fn print_suggestions(suggestions: &[String]) {
    if suggestions.is_empty() {
        println!("No style suggestions");
        return;
    }
    println!("Style suggestions:");
    for (index, suggestion) in suggestions.iter().enumerate() {
        println!("{}. {suggestion}", index + 1);
    }
}

fn print_status(session: &StudioSession) {
    let studio = &session.studio;
    let selection = studio.selection();
    let document = studio.current();
    let position = studio.history_position();
    println!(
        "Photo: {}",
        if selection.person().is_some() {
            "loaded"
        } else {
            "none"
        }
    );
    println!("Garments: {}/{MAX_GARMENTS}", selection.garments().len());
    println!(
        "Pose: {}{}",
        selection.pose(),
        if selection.has_custom_pose() {
            format!(" ({})", selection.custom_pose_text())
        } else {
            String::new()
        }
    );
    println!("Fit: {}", selection.fit());
    println!("Background: {}", selection.background());
    if !document.background_edit_text().is_empty() {
        println!("Background edit: {}", document.background_edit_text());
    }
    if !document.custom_edit_text().is_empty() {
        println!("Edit: {}", document.custom_edit_text());
    }
    println!(
        "History {}/{} (undo: {}, redo: {}), generated: {}",
        position.cursor + 1,
        position.len,
        studio.can_undo(),
        studio.can_redo(),
        document.is_refinement()
    );
    println!("Artifacts: {}", session.artifacts.len());
}

/// Chat indices are 1-based; `0` and non-numbers are rejected.
fn one_based_index(intent: &Intent) -> Option<usize> {
    intent
        .arg_index("index")
        .filter(|index| *index > 0)
        .map(|index| index - 1)
}

fn artifact_file_name(index: usize, extension: &str) -> String {
    format!("artifact-{index:03}.{extension}")
}

fn receipt_file_name(index: usize) -> String {
    format!("receipt-{index:03}.json")
}

fn surprise_prompt(seed: u64) -> &'static str {
    SURPRISE_PROMPTS[(seed % SURPRISE_PROMPTS.len() as u64) as usize]
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::from(elapsed.subsec_nanos()))
        .unwrap_or_default()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
