use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::cursor;
use crossterm::event;
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use flipbook_core::{
    Book, Command, Config, Editor, EditorEvent, ProjectSettings, ProjectStore, RecordStore,
    TextOverlay, UploadFile, Viewer, ViewerOptions,
};
use flipbook_remote::{ApiClient, HostedUploader};
use flipbook_tty::{
    combine_status, format_editor_status, render_page_strip, render_viewer_page,
    truncate_with_ellipsis, write_status_line, EventMapper, InputMode, Prompt, UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "flipbook",
    version,
    about = "Build, share and browse page-flip yearbooks from the terminal"
)]
struct Args {
    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides config and FLIPBOOK_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Image host upload preset, overrides config and FLIPBOOK_UPLOAD_PRESET
    #[arg(long, global = true)]
    upload_preset: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Edit the book interactively
    Edit,
    /// Open a published book by its share id
    View {
        share_id: String,
        #[arg(long)]
        password: Option<String>,
        /// Print every page and exit instead of opening the pager
        #[arg(long)]
        print: bool,
    },
    /// Page through the live page records read-only
    Browse {
        #[arg(long)]
        print: bool,
    },
    /// Publish the current book and print its share id
    Publish {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        allow_download: bool,
    },
    /// Re-submit every page and remove orphaned records
    Save,
    /// List the remote page records
    Records {
        #[arg(long)]
        json: bool,
    },
    /// Print the page labels of a book layout; never touches the network
    Labels {
        /// Number of content pages between cover and closing
        #[arg(short = 'n', long, default_value_t = 3)]
        pages: usize,
        /// Custom page name as INDEX=NAME, repeatable
        #[arg(long = "name", value_parser = parse_page_name)]
        names: Vec<(usize, String)>,
    },
}

fn parse_page_name(raw: &str) -> Result<(usize, String), String> {
    let (index, name) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=NAME, got {:?}", raw))?;
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("invalid page index {:?}: {}", index, err))?;
    Ok((index, name.to_string()))
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Commands::Labels { pages, names } = &args.command {
        return print_labels(*pages, names);
    }

    let project_dirs = ProjectDirs::from("net", "flipbook", "flipbook")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let interactive = matches!(
        &args.command,
        Commands::Edit
            | Commands::View { print: false, .. }
            | Commands::Browse { print: false }
    );
    let _log_guard = init_logging(&project_dirs, !interactive)?;

    let config = load_config(&args)?;
    let api = Arc::new(
        ApiClient::from_config(&config.api)
            .with_context(|| format!("invalid api url {:?}", config.api.base_url))?,
    );
    info!(api = %api.base_url(), "starting flipbook");

    match args.command {
        Commands::Edit => {
            let uploader = Arc::new(HostedUploader::from_config(&config.upload)?);
            let mut editor = Editor::new(&config, api.clone(), uploader);
            editor.load().await;
            run_editor(&mut editor, api.as_ref()).await?;
            let report = editor.flush().await;
            if !report.failed.is_empty() {
                warn!(failed = ?report.failed, "some page records were not saved before exit");
            }
            Ok(())
        }
        Commands::View {
            share_id,
            password,
            print,
        } => {
            let options = ViewerOptions {
                analytics: config.editor.capabilities.analytics,
            };
            let mut viewer = Viewer::open(api.as_ref(), &share_id, options).await?;
            if let Some(password) = password {
                viewer.unlock(api.as_ref(), &password).await?;
            }
            if print {
                print_viewer(&mut viewer)
            } else {
                run_viewer(&mut viewer, api.as_ref()).await
            }
        }
        Commands::Browse { print } => {
            let records = config.sync.run("list", || api.list()).await?;
            let mut viewer = Viewer::from_records(&records, config.editor.max_pages)?;
            if print {
                print_viewer(&mut viewer)
            } else {
                run_viewer(&mut viewer, api.as_ref()).await
            }
        }
        Commands::Publish {
            title,
            password,
            allow_download,
        } => {
            let uploader = Arc::new(HostedUploader::from_config(&config.upload)?);
            let mut editor = Editor::new(&config, api.clone(), uploader);
            editor.load().await;
            let settings = ProjectSettings {
                title,
                allow_download,
            };
            let share_id = editor.publish(api.as_ref(), settings, password).await?;
            println!("{}", share_id);
            Ok(())
        }
        Commands::Save => {
            let uploader = Arc::new(HostedUploader::from_config(&config.upload)?);
            let mut editor = Editor::new(&config, api.clone(), uploader);
            editor.load().await;
            let report = editor.save_all().await?;
            println!(
                "saved {} pages, removed {} orphaned records",
                report.saved.len(),
                report.orphans.deleted.len()
            );
            if !report.is_clean() {
                bail!(
                    "failed to save pages {:?}, failed to remove records {:?}",
                    report.failed,
                    report.orphans.failed
                );
            }
            Ok(())
        }
        Commands::Records { json } => {
            let records = config.sync.run("list", || api.list()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!(
                        "{}\t{}\t{}",
                        record.page_index,
                        record.url,
                        record.page_name.as_deref().unwrap_or("")
                    );
                }
            }
            Ok(())
        }
        Commands::Labels { .. } => Ok(()),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let path = args.config.clone().or_else(Config::default_path);
    let config = match path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    Ok(config
        .with_env_overrides()
        .with_overrides(args.api_url.clone(), args.upload_preset.clone()))
}

fn print_labels(pages: usize, names: &[(usize, String)]) -> Result<()> {
    let mut book = Book::new(pages);
    for (index, name) in names {
        book.rename(*index, name)
            .with_context(|| format!("cannot name page {}", index))?;
    }
    let mut stdout = io::stdout().lock();
    for (index, label) in book.labels().iter().enumerate() {
        writeln!(stdout, "{}\t{}", index, label)?;
    }
    Ok(())
}

fn print_viewer(viewer: &mut Viewer) -> Result<()> {
    if viewer.is_locked() {
        bail!("this flipbook is password protected, pass --password");
    }
    if let Some(share_id) = viewer.share_id() {
        println!("share id: {}", share_id);
        println!();
    }
    for index in 0..viewer.len() {
        viewer.goto(index);
        for line in render_viewer_page(viewer) {
            println!("{}", line);
        }
        println!();
    }
    Ok(())
}

enum LoopAction {
    Continue,
    Quit,
}

async fn run_editor(editor: &mut Editor, projects: &dyn ProjectStore) -> Result<()> {
    let events = editor.events();
    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut mapper = EventMapper::new();
    let mut message: Option<String> = None;
    let mut dirty = true;

    loop {
        for event in events.lock().drain(..) {
            match event {
                EditorEvent::Alert(text) => message = Some(text),
                EditorEvent::Saved(at) => {
                    message = Some(format!("saved at {}", at.format("%H:%M:%S")))
                }
                EditorEvent::Synced { failed, .. } if failed > 0 => {
                    message = Some(format!("{} page records failed to sync", failed))
                }
                _ => {}
            }
            dirty = true;
        }

        if dirty {
            redraw_editor(&mut stdout, editor, &mapper, message.as_deref())?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ui_event = mapper.map_event(event::read()?);
            match handle_editor_event(ui_event, editor, projects, &mut mapper).await {
                Ok(LoopAction::Quit) => break,
                Ok(LoopAction::Continue) => {}
                Err(err) => {
                    warn!(error = %format!("{:#}", err), "editor action failed");
                    message = Some(format!("{:#}", err));
                }
            }
            dirty = true;
        }
    }

    crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

async fn handle_editor_event(
    event: UiEvent,
    editor: &mut Editor,
    projects: &dyn ProjectStore,
    mapper: &mut EventMapper,
) -> Result<LoopAction> {
    let selected = editor.selected();
    match event {
        UiEvent::Quit => return Ok(LoopAction::Quit),
        UiEvent::Command(command) => editor.apply(command)?,
        UiEvent::MoveSelected { delta } => {
            let last = editor.book().len().saturating_sub(1) as isize;
            let to = (selected as isize + delta).clamp(0, last) as usize;
            editor.apply(Command::Reorder { from: selected, to })?;
            editor.select(to);
        }
        UiEvent::ClearSelected => editor.apply(Command::ClearImage { index: selected })?,
        UiEvent::RemoveOverlay => {
            let count = editor
                .book()
                .slot(selected)
                .map(|slot| slot.overlays.len())
                .unwrap_or(0);
            if count > 0 {
                editor.apply(Command::RemoveOverlay {
                    index: selected,
                    overlay: count - 1,
                })?;
            }
        }
        UiEvent::BeginPrompt(Prompt::BulkUpload) if !editor.capabilities().bulk_upload => {
            mapper.set_mode(InputMode::Normal);
            bail!("bulk upload is disabled for this editor");
        }
        UiEvent::BeginPrompt(Prompt::Overlay) if !editor.capabilities().text_overlays => {
            mapper.set_mode(InputMode::Normal);
            bail!("text overlays are disabled for this editor");
        }
        UiEvent::BeginPrompt(Prompt::Rename) => {
            if let Some(name) = editor.book().slot(selected).and_then(|slot| slot.name.clone()) {
                mapper.begin_prompt(Prompt::Rename, &name);
            }
        }
        UiEvent::PromptSubmit { prompt, text } => match prompt {
            Prompt::Rename => editor.apply(Command::Rename {
                index: selected,
                name: text,
            })?,
            Prompt::Upload => {
                let path = PathBuf::from(text.trim());
                let file = UploadFile::from_path(&path)?;
                editor.upload(selected, &file).await?;
            }
            Prompt::BulkUpload => {
                let files = collect_upload_files(Path::new(text.trim()))?;
                let report = editor.bulk_upload(&files).await?;
                info!(written = report.written(), "bulk upload finished");
            }
            Prompt::Overlay => {
                if !text.trim().is_empty() {
                    editor.apply(Command::AddOverlay {
                        index: selected,
                        overlay: TextOverlay::new(text.trim(), 50.0, 90.0),
                    })?;
                }
            }
            Prompt::Password => {}
        },
        UiEvent::Save => {
            editor.save_all().await?;
        }
        UiEvent::Reconcile => {
            let (report, orphans) = editor.reconcile().await?;
            info!(
                written = report.written(),
                orphans = orphans.deleted.len(),
                "reconciled page records"
            );
        }
        UiEvent::Publish => {
            let share_id = editor
                .publish(projects, ProjectSettings::default(), None)
                .await?;
            editor.events().lock().push(EditorEvent::Alert(format!(
                "published as {}",
                share_id
            )));
        }
        UiEvent::BeginPrompt(_)
        | UiEvent::PromptChanged { .. }
        | UiEvent::PromptCancel
        | UiEvent::None => {}
    }
    editor.flush().await;
    Ok(LoopAction::Continue)
}

/// Image files in `dir`, in natural file-name order.
fn collect_upload_files(dir: &Path) -> Result<Vec<UploadFile>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort_by(|a, b| natord::compare(&file_name(a), &file_name(b)));
    paths
        .iter()
        .map(|path| {
            UploadFile::from_path(path).with_context(|| format!("failed to read {:?}", path))
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn redraw_editor(
    out: &mut impl Write,
    editor: &Editor,
    mapper: &EventMapper,
    message: Option<&str>,
) -> Result<()> {
    let (cols, rows) = terminal::size()?;
    let width = usize::from(cols).max(1);
    let list_rows = usize::from(rows).saturating_sub(2).max(1);
    crossterm::queue!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;

    let strip = render_page_strip(editor.book(), editor.selected(), width);
    let start = editor.selected().saturating_sub(list_rows.saturating_sub(1));
    for (row, line) in strip.iter().skip(start).take(list_rows).enumerate() {
        crossterm::queue!(out, cursor::MoveTo(0, row as u16), Print(line))?;
    }
    if let Some(message) = message {
        crossterm::queue!(
            out,
            cursor::MoveTo(0, rows.saturating_sub(2)),
            Print(truncate_with_ellipsis(message.to_string(), width))
        )?;
    }

    let status = combine_status(
        Some(format_editor_status(editor)),
        mapper.pending_input().as_deref(),
    );
    draw_status_line(out, rows, width, status.as_deref().unwrap_or_default())
}

fn draw_status_line(out: &mut impl Write, rows: u16, width: usize, status: &str) -> Result<()> {
    crossterm::queue!(
        out,
        cursor::MoveTo(0, rows.saturating_sub(1)),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(out, &truncate_with_ellipsis(status.to_string(), width))?;
    Ok(())
}

async fn run_viewer(viewer: &mut Viewer, projects: &dyn ProjectStore) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut mapper = EventMapper::new();
    let mut message: Option<String> = None;
    let mut dirty = true;

    loop {
        if viewer.is_locked() && mapper.mode() == InputMode::Normal {
            mapper.begin_prompt(Prompt::Password, "");
        }

        if dirty {
            redraw_viewer(&mut stdout, viewer, &mapper, message.as_deref())?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            match mapper.map_event(event::read()?) {
                UiEvent::Quit => break,
                UiEvent::PromptCancel if viewer.is_locked() => break,
                UiEvent::PromptSubmit {
                    prompt: Prompt::Password,
                    text,
                } => match viewer.unlock(projects, &text).await {
                    Ok(()) => message = None,
                    Err(err) => message = Some(err.to_string()),
                },
                UiEvent::Command(Command::NextPage { count }) => {
                    viewer.goto(viewer.current().saturating_add(count));
                }
                UiEvent::Command(Command::PrevPage { count }) => {
                    viewer.goto(viewer.current().saturating_sub(count));
                }
                UiEvent::Command(Command::SelectPage { index }) => {
                    viewer.goto(index);
                }
                _ => {}
            }
            dirty = true;
        }
    }

    crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

fn redraw_viewer(
    out: &mut impl Write,
    viewer: &Viewer,
    mapper: &EventMapper,
    message: Option<&str>,
) -> Result<()> {
    let (cols, rows) = terminal::size()?;
    let width = usize::from(cols).max(1);
    crossterm::queue!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    for (row, line) in render_viewer_page(viewer).into_iter().enumerate() {
        crossterm::queue!(
            out,
            cursor::MoveTo(0, row as u16),
            Print(truncate_with_ellipsis(line, width))
        )?;
    }
    if let Some(message) = message {
        crossterm::queue!(out, cursor::MoveTo(0, rows.saturating_sub(2)), Print(message))?;
    }
    let base = if viewer.is_locked() {
        None
    } else {
        let upcoming = viewer
            .neighbors(1)
            .into_iter()
            .map(|index| viewer.label(index))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("{} - next to load: {}", viewer.label(viewer.current()), upcoming))
    };
    let status = combine_status(base, mapper.pending_input().as_deref());
    draw_status_line(out, rows, width, status.as_deref().unwrap_or_default())?;
    out.flush()?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(log_dir, "flipbook.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
