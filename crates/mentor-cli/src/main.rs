use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use mentor_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use mentor_contracts::history::{entry_title, HistoryStore};
use mentor_contracts::pages::{Mode, Page};
use mentor_engine::{GeminiProvider, RenderedImage, Session, Submission};
use serde_json::Value;

const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

#[derive(Debug, Parser)]
#[command(
    name = "mentor",
    version,
    about = "Teaching assistant, image generator and math solver backed by Gemini"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Run(RunArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_TEXT_MODEL)]
    text_model: String,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    image_model: String,
    #[arg(long, default_value = "teaching", value_parser = parse_page_arg)]
    page: Page,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long, value_parser = parse_mode_arg)]
    mode: Mode,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_TEXT_MODEL)]
    text_model: String,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    image_model: String,
    /// Write the generated image into --out.
    #[arg(long)]
    save: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mentor error: {err:#}");
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
        Command::Run(args) => run_once(args),
    }
}

fn open_session(
    out: &Path,
    events: Option<PathBuf>,
    text_model: String,
    image_model: String,
) -> Result<Session> {
    let provider = GeminiProvider::from_env()?;
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    Session::new(
        out,
        events_path,
        Some(text_model),
        Some(image_model),
        Box::new(provider),
    )
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = open_session(&args.out, args.events, args.text_model, args.image_model)?;
    session.select_page(args.page)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    let mut state = ChatState::default();

    writeln!(
        stdout,
        "Mentor chat started (downloads go to {}). Type /help for commands.",
        session.out_dir().display()
    )?;
    print_page_header(&session, &mut stdout)?;

    loop {
        write!(stdout, "{}> ", session.page().slug())?;
        stdout.flush()?;

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
        handle_intent(&mut session, &mut state, &parse_intent(input), &mut stdout)?;
    }

    session.finish()?;
    Ok(())
}

#[derive(Default)]
struct ChatState {
    last_image: Option<RenderedImage>,
}

/// Runs one chat intent. Failed downloads, exports and generations are
/// reported to `out` and the session carries on; only event log and output
/// write failures are returned.
fn handle_intent(
    session: &mut Session,
    state: &mut ChatState,
    intent: &Intent,
    out: &mut impl Write,
) -> Result<()> {
    match intent.action.as_str() {
        "help" => {
            writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?;
            writeln!(out, "Anything else is sent as the prompt for the current page.")?;
            writeln!(out, "Start a line with // to send a prompt beginning with /.")?;
        }
        "list_pages" => {
            for page in Page::ALL {
                let marker = if page == session.page() { "*" } else { " " };
                writeln!(out, "{marker} /{:<9} {}", page.slug(), page.label())?;
            }
        }
        "select_page" => {
            let Some(page) = value_as_non_empty_string(intent.command_args.get("page"))
                .and_then(|name| Page::from_name(&name))
            else {
                writeln!(out, "Unknown page.")?;
                return Ok(());
            };
            session.select_page(page)?;
            state.last_image = None;
            print_page_header(session, out)?;
        }
        "set_text_model" => {
            let Some(model) = value_as_non_empty_string(intent.command_args.get("model")) else {
                writeln!(
                    out,
                    "Text model: {} (available: {})",
                    session.text_model().unwrap_or(DEFAULT_TEXT_MODEL),
                    session.available_models(Mode::Text).join(", ")
                )?;
                return Ok(());
            };
            session.set_text_model(Some(model.clone()));
            writeln!(out, "Text model set to {model}")?;
        }
        "set_image_model" => {
            let Some(model) = value_as_non_empty_string(intent.command_args.get("model")) else {
                writeln!(
                    out,
                    "Image model: {} (available: {})",
                    session.image_model().unwrap_or(DEFAULT_IMAGE_MODEL),
                    session.available_models(Mode::Image).join(", ")
                )?;
                return Ok(());
            };
            session.set_image_model(Some(model.clone()));
            writeln!(out, "Image model set to {model}")?;
        }
        "download" => {
            let Some(image) = state.last_image.as_ref() else {
                writeln!(
                    out,
                    "No image to download. Generate one on the Image Generator page first."
                )?;
                return Ok(());
            };
            match session.download(image) {
                Ok(path) => writeln!(out, "Saved {}", path.display())?,
                Err(err) => writeln!(out, "Error: {err:#}")?,
            }
        }
        "export" => {
            let path =
                value_as_non_empty_string(intent.command_args.get("path")).map(PathBuf::from);
            match session.export_history(path.as_deref()) {
                Ok(written) => writeln!(out, "Exported history to {}", written.display())?,
                Err(err) => writeln!(out, "Error: {err:#}")?,
            }
        }
        "unknown" => {
            let command = value_as_non_empty_string(intent.command_args.get("command"))
                .unwrap_or_else(|| "unknown".to_string());
            writeln!(out, "Unknown command: /{command}")?;
        }
        "submit" => {
            let page = session.page();
            let Some(mode) = page.mode() else {
                writeln!(
                    out,
                    "History is read-only. Switch pages with /teaching, /image or /math."
                )?;
                return Ok(());
            };
            let prompt = intent.prompt.clone().unwrap_or_default();
            if !prompt.trim().is_empty() {
                if let Some(progress) = page.progress_label() {
                    writeln!(out, "{progress}")?;
                }
            }
            if mode == Mode::Image {
                state.last_image = None;
            }

            match session.submit(mode, &prompt) {
                Ok(Submission::Rejected { warning }) => {
                    writeln!(out, "Warning: {warning}")?;
                    return Ok(());
                }
                Ok(Submission::Text { text, .. }) => {
                    writeln!(out, "{text}")?;
                }
                Ok(Submission::Image { image, caption }) => {
                    if let Some(caption) = caption {
                        writeln!(out, "{caption}")?;
                    }
                    writeln!(out, "{}", image_preview_line(&image))?;
                    writeln!(out, "Type /download to save it.")?;
                    state.last_image = Some(image);
                }
                Err(err) => {
                    writeln!(out, "Error: {err:#}")?;
                }
            }
            if let Some(reason) = session.last_fallback_reason() {
                writeln!(out, "Model fallback: {reason}")?;
            }
        }
        other => {
            writeln!(out, "Unknown command: {other}")?;
        }
    }
    Ok(())
}

fn run_once(args: RunArgs) -> Result<i32> {
    let mut session = open_session(&args.out, args.events, args.text_model, args.image_model)?;
    session.select_page(args.mode.page())?;

    let result = session.submit(args.mode, &args.prompt);
    let code = match result {
        Ok(Submission::Rejected { warning }) => {
            eprintln!("Warning: {warning}");
            2
        }
        Ok(Submission::Text { text, .. }) => {
            println!("{text}");
            0
        }
        Ok(Submission::Image { image, caption }) => {
            if let Some(caption) = caption {
                println!("{caption}");
            }
            println!("{}", image_preview_line(&image));
            if args.save {
                let path = session.download(&image)?;
                println!("Saved {}", path.display());
            } else {
                println!("Pass --save to write {}.", image.file_name());
            }
            0
        }
        Err(err) => {
            session.finish()?;
            return Err(err);
        }
    };
    session.finish()?;
    Ok(code)
}

fn print_page_header(session: &Session, out: &mut impl Write) -> io::Result<()> {
    let page = session.page();
    writeln!(out, "== {} ==", page.header())?;
    match (page.input_label(), page.action_label()) {
        (Some(input), Some(action)) => writeln!(out, "{input} (press Enter to {action})"),
        _ => print_history(session.history(), out),
    }
}

fn print_history(history: &HistoryStore, out: &mut impl Write) -> io::Result<()> {
    if history.is_empty() {
        return writeln!(out, "No interactions yet.");
    }
    for (idx, entry) in history.list_reversed().enumerate() {
        writeln!(out, "[{}]", entry_title(entry, idx + 1))?;
        writeln!(out, "  Prompt: {}", indent_continuation(entry.prompt(), "          "))?;
        writeln!(out, "  Output: {}", indent_continuation(entry.output(), "          "))?;
    }
    Ok(())
}

fn image_preview_line(image: &RenderedImage) -> String {
    format!(
        "Image ready: {}x{} PNG ({} bytes) as {}",
        image.width(),
        image.height(),
        image.png_bytes().len(),
        image.file_name()
    )
}

/// Indents every line after the first so multi-line answers stay aligned
/// under their label.
fn indent_continuation(text: &str, pad: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(idx, line)| {
            if idx == 0 {
                line.to_string()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<String>>()
        .join("\n")
}

fn parse_page_arg(raw: &str) -> Result<Page, String> {
    Page::from_name(raw).ok_or_else(|| {
        format!(
            "unknown page '{raw}' (expected one of: {})",
            Page::ALL
                .iter()
                .map(|page| page.slug())
                .collect::<Vec<&str>>()
                .join(", ")
        )
    })
}

fn parse_mode_arg(raw: &str) -> Result<Mode, String> {
    let page = parse_page_arg(raw)?;
    page.mode()
        .ok_or_else(|| format!("page '{}' does not accept prompts", page.label()))
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use clap::Parser;
    use mentor_contracts::chat::parse_intent;
    use mentor_contracts::pages::{Mode, Page};
    use mentor_engine::gemini::ResponsePart;
    use mentor_engine::{GenerateRequest, GenerateResponse, GenerationProvider, Session};
    use serde_json::{json, Value};

    use super::{
        handle_intent, indent_continuation, parse_mode_arg, parse_page_arg,
        value_as_non_empty_string, ChatState, Cli, Command, DEFAULT_IMAGE_MODEL,
    };

    /// Answers text prompts from a fixed list, then fails.
    struct CannedProvider {
        replies: Mutex<Vec<&'static str>>,
    }

    impl GenerationProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn generate(&self, _request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(anyhow!("offline"));
            }
            Ok(GenerateResponse::from_parts(vec![ResponsePart::text(
                replies.remove(0),
            )]))
        }
    }

    fn chat_session(out_dir: &Path, replies: Vec<&'static str>) -> Session {
        Session::new(
            out_dir,
            out_dir.join("events.jsonl"),
            None,
            None,
            Box::new(CannedProvider {
                replies: Mutex::new(replies),
            }),
        )
        .unwrap()
    }

    fn run_lines(session: &mut Session, state: &mut ChatState, lines: &[&str]) -> String {
        let mut out = Vec::new();
        for line in lines {
            handle_intent(session, state, &parse_intent(line), &mut out).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn failed_export_is_reported_and_chat_continues() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let mut session = chat_session(temp.path(), Vec::new());
        let mut state = ChatState::default();

        let export = format!("/export \"{}\"", blocker.join("history.json").display());
        let output = run_lines(&mut session, &mut state, &[&export, "/help"]);

        assert!(output.contains("Error: failed to create"));
        assert!(output.contains("Commands: /teaching"));
        session.finish().unwrap();
        assert!(temp.path().join("summary.json").is_file());
    }

    #[test]
    fn download_without_image_is_a_message_not_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = chat_session(temp.path(), Vec::new());
        let mut state = ChatState::default();

        let output = run_lines(&mut session, &mut state, &["/download", "/pages"]);
        assert!(output.contains("No image to download."));
        assert!(output.contains("* /teaching"));
    }

    #[test]
    fn answers_show_up_on_the_history_page() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = chat_session(temp.path(), vec!["4"]);
        let mut state = ChatState::default();

        let output = run_lines(
            &mut session,
            &mut state,
            &["/math", "", "What is 2+2?", "again?", "/history", "hello"],
        );

        assert!(output.contains("Warning: Please enter a math problem."));
        assert!(output.contains("Solving...\n4\n"));
        assert!(output.contains("Error: offline"));
        assert!(output.contains("[Math #1]\n  Prompt: What is 2+2?\n  Output: 4\n"));
        assert!(output.contains("History is read-only."));
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn chat_args_default_models_and_page() {
        let cli = Cli::try_parse_from(["mentor", "chat", "--out", "/tmp/mentor"]).unwrap();
        let Command::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(args.page, Page::Teaching);
        assert_eq!(args.text_model, "gemini-2.0-flash");
        assert_eq!(args.image_model, DEFAULT_IMAGE_MODEL);
        assert!(args.events.is_none());
    }

    #[test]
    fn run_args_parse_mode_and_save() {
        let cli = Cli::try_parse_from([
            "mentor",
            "run",
            "--mode",
            "math",
            "--prompt",
            "What is 2+2?",
            "--out",
            "/tmp/mentor",
            "--save",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, Mode::Math);
        assert_eq!(args.prompt, "What is 2+2?");
        assert!(args.save);
    }

    #[test]
    fn history_is_not_a_run_mode() {
        assert_eq!(parse_mode_arg("image"), Ok(Mode::Image));
        assert_eq!(parse_page_arg("history"), Ok(Page::History));
        assert!(parse_mode_arg("history").is_err());
        assert!(parse_page_arg("settings")
            .unwrap_err()
            .contains("teaching, image, math, history"));
    }

    #[test]
    fn continuation_lines_are_indented() {
        assert_eq!(indent_continuation("one", "  "), "one");
        assert_eq!(indent_continuation("one\ntwo\nthree", "  "), "one\n  two\n  three");
    }

    #[test]
    fn blank_strings_are_treated_as_missing() {
        assert_eq!(value_as_non_empty_string(Some(&json!("  "))), None);
        assert_eq!(
            value_as_non_empty_string(Some(&json!(" gemini-2.5-flash "))),
            Some("gemini-2.5-flash".to_string())
        );
        assert_eq!(value_as_non_empty_string(Some(&Value::Null)), None);
        assert_eq!(value_as_non_empty_string(None), None);
    }
}
