//! Stave entrypoint.
//!
//! Starts the engine, validator and export peers in-process, loads one MEI
//! document, optionally replays a gesture script through the action
//! serializer and writes an export, then prints a short session summary.
mod script;

use anyhow::{Context, Result, bail};
use clap::Parser;
use core_actions::{
    ActionObserver, ActionSerializer, EditOperation, Gesture, SelectionSet, SharedSelection,
};
use core_config::{Config, load_from};
use core_engine::{Diagnostic, EnginePeer, ExportPeer, ValidatorPeer};
use core_events::{ComponentId, Dispatcher, Event, EventKind};
use core_rpc::{
    Deferred, EngineMethod, ExportMethod, PeerHandler, PeerHost, RemoteProxy, ValidatorMethod,
    pair,
};
use script::{ReplayTally, ScriptStep};
use serde_json::{Value, json};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;

const WELCOME_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mei xmlns="http://www.music-encoding.org/ns/mei" meiversion="5.0"><music><body><mdiv><score><section>
  <note xml:id="note-1" pname="c" oct="4" dur="4"/>
  <note xml:id="note-2" pname="d" oct="4" dur="4"/>
  <note xml:id="note-3" pname="e" oct="4" dur="4"/>
  <note xml:id="note-4" pname="f" oct="4" dur="4"/>
  <dir xml:id="dir-1">Welcome to stave</dir>
</section></score></mdiv></body></music></mei>
"#;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "stave", version, about = "Stave score editing session")]
struct Args {
    /// MEI document to open. If omitted a small welcome score is used.
    pub document: Option<PathBuf>,
    /// Configuration file path (overrides discovery of `stave.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// JSON gesture script to replay after loading.
    #[arg(long = "script")]
    pub script: Option<PathBuf>,
    /// Write the edited score; format follows the extension (mei, svg, pdf, mid).
    #[arg(long = "export")]
    pub export: Option<PathBuf>,
}

struct AppStartup {
    _log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { _log_guard: None }
    }

    fn run(&mut self) -> Result<Args> {
        self.configure_logging()?;
        Self::install_panic_hook();
        info!(target: "runtime", "startup");
        Ok(Args::parse())
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("stave.log");
        if log_path.exists() {
            let _ = fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "stave.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        if tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
            .is_ok()
        {
            self._log_guard = Some(guard);
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Mei,
    Svg,
    Pdf,
    Midi,
}

impl ExportFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mei" | "xml" => Some(Self::Mei),
            "svg" => Some(Self::Svg),
            "pdf" => Some(Self::Pdf),
            "mid" | "midi" => Some(Self::Midi),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Mei => "mei",
            Self::Svg => "svg",
            Self::Pdf => "pdf",
            Self::Midi => "midi",
        }
    }
}

/// Logs every chain the serializer sends.
struct ScriptObserver;

impl ActionObserver for ScriptObserver {
    fn on_transaction(&self, gesture: &Gesture, chain: &[EditOperation]) {
        debug!(target: "runtime.script", gesture = %gesture.kind(), steps = chain.len(), "transaction_sent");
    }

    fn on_deferred(&self, gesture: &Gesture, position: usize) {
        debug!(target: "runtime.script", gesture = %gesture.kind(), position, "transaction_deferred");
    }
}

/// Typed host tasks; each returns its handler once the proxy hangs up.
struct PeerTasks {
    engine: JoinHandle<EnginePeer>,
    validator: JoinHandle<ValidatorPeer>,
    export: JoinHandle<ExportPeer>,
}

#[derive(Debug, Default)]
struct ShutdownReport {
    commits: Option<u64>,
    exports: Option<u64>,
    schema: Option<String>,
}

fn connect<H: PeerHandler>(
    name: &'static str,
    handler: H,
) -> (Arc<RemoteProxy<H::Method>>, Deferred<()>, JoinHandle<H>) {
    let (proxy_end, peer_end) = pair();
    let proxy = Arc::new(RemoteProxy::spawn(name, proxy_end));
    // Register before the host can announce itself; readiness is not replayed.
    let ready = proxy.on_ready();
    let task = PeerHost::new(name, peer_end, handler).spawn();
    (proxy, ready, task)
}

async fn await_ready(name: &'static str, ready: Deferred<()>, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, ready.wait()).await {
        Ok(()) => {
            debug!(target: "runtime.startup", peer = name, "peer_ready");
            Ok(())
        }
        Err(_) => {
            let timeout_ms = limit.as_millis();
            error!(target: "runtime.startup", peer = name, timeout_ms, "peer_not_ready");
            bail!("peer `{name}` did not become ready within {timeout_ms} ms")
        }
    }
}

async fn join_peer<H>(name: &'static str, task: JoinHandle<H>) -> Option<H> {
    match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
        Ok(Ok(handler)) => {
            trace!(target: "runtime.shutdown", peer = name, "peer_joined");
            Some(handler)
        }
        Ok(Err(err)) => {
            error!(target: "runtime.shutdown", peer = name, ?err, "peer_join_failed");
            None
        }
        Err(_) => {
            warn!(target: "runtime.shutdown", peer = name, "peer_join_timeout");
            None
        }
    }
}

struct Session {
    config: Config,
    engine: Arc<RemoteProxy<EngineMethod>>,
    validator: Arc<RemoteProxy<ValidatorMethod>>,
    export: Arc<RemoteProxy<ExportMethod>>,
    serializer: Arc<ActionSerializer>,
    selection: SharedSelection,
    events: Dispatcher,
    updates: Arc<AtomicU64>,
    tasks: PeerTasks,
}

impl Session {
    async fn start(config: Config) -> Result<Self> {
        let (engine, engine_ready, engine_task) = connect("engine", EnginePeer::new());
        let (validator, validator_ready, validator_task) =
            connect("validator", ValidatorPeer::new());
        let (export, export_ready, export_task) = connect("export", ExportPeer::new());

        let limit = config.ready_timeout();
        await_ready("engine", engine_ready, limit).await?;
        await_ready("validator", validator_ready, limit).await?;
        await_ready("export", export_ready, limit).await?;

        let events = Dispatcher::new("stave");
        let updates = Arc::new(AtomicU64::new(0));
        let status = ComponentId::next();
        {
            let updates = Arc::clone(&updates);
            events.bind(status, EventKind::UpdateData, move |event| {
                if let Event::UpdateData { document, .. } = event {
                    updates.fetch_add(1, Ordering::Relaxed);
                    trace!(target: "runtime", size_bytes = document.len(), "document_updated");
                }
                true
            });
        }
        events.bind(status, EventKind::PageChange, |event| {
            if let Event::PageChange { page } = event {
                info!(target: "runtime", page, "page_changed");
            }
            true
        });

        let selection = SharedSelection::default();
        let serializer = Arc::new(
            ActionSerializer::new(
                Arc::clone(&engine),
                Arc::new(selection.clone()),
                events.clone(),
            )
            .with_observer(Box::new(ScriptObserver)),
        );

        Ok(Self {
            config,
            engine,
            validator,
            export,
            serializer,
            selection,
            events,
            updates,
            tasks: PeerTasks {
                engine: engine_task,
                validator: validator_task,
                export: export_task,
            },
        })
    }

    async fn page_count(&self) -> Result<u32> {
        let value = self.engine.invoke(EngineMethod::GetPageCount, vec![]).await;
        value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .with_context(|| format!("engine returned `{value}` for the page count"))
    }

    /// Apply the configured view, load `text` and size the page bounds.
    async fn load(&self, text: &str) -> Result<u32> {
        self.serializer
            .sync_options(self.config.view_options(1))
            .await?;
        let loaded = self
            .engine
            .invoke(EngineMethod::LoadData, vec![json!(text)])
            .await;
        if loaded != json!(true) {
            bail!("engine rejected the document");
        }
        self.events.dispatch(&Event::LoadData {
            document: Arc::from(text),
            origin: None,
        });
        let pages = self.page_count().await?;
        self.serializer.set_page_bounds(1, pages);
        info!(target: "runtime", pages, "document_opened");
        Ok(pages)
    }

    async fn render_current(&self) -> Result<String> {
        let page = self.serializer.status().current_page;
        let svg = self
            .engine
            .invoke(EngineMethod::RenderToSvg, vec![json!(page)])
            .await;
        match svg {
            Value::String(svg) => Ok(svg),
            other => bail!("engine returned `{other}` when rendering page {page}"),
        }
    }

    async fn current_mei(&self) -> Result<String> {
        match self.engine.invoke(EngineMethod::GetMei, vec![]).await {
            Value::String(mei) => Ok(mei),
            other => bail!("engine returned `{other}` for the document text"),
        }
    }

    /// Validate the engine's current document. Without a configured schema
    /// there is nothing to validate against and no call is made.
    async fn validate(&self) -> Result<Option<Vec<Diagnostic>>> {
        let Some(schema) = self.config.file.peers.schema.as_deref() else {
            info!(target: "runtime", "validation_skipped_no_schema");
            return Ok(None);
        };
        let accepted = self
            .validator
            .invoke(ValidatorMethod::SetSchema, vec![json!(schema)])
            .await;
        if accepted != json!(true) {
            bail!("validator refused schema `{schema}`");
        }
        let mei = self.current_mei().await?;
        let raw = self
            .validator
            .invoke(ValidatorMethod::Validate, vec![json!(mei)])
            .await;
        let diagnostics: Vec<Diagnostic> =
            serde_json::from_value(raw).context("validator answered with malformed diagnostics")?;
        for d in &diagnostics {
            warn!(target: "runtime", message = d.message.as_str(), element = d.element.as_deref(), "validation_diagnostic");
        }
        Ok(Some(diagnostics))
    }

    /// Zoom changes re-send options and repaginate before the next gesture.
    async fn apply_zoom(&mut self, requested: u32) -> Result<()> {
        let Some(scale) = self.config.recompute_zoom(requested) else {
            return Ok(());
        };
        self.events.dispatch(&Event::Zoom { scale });
        let current = self.serializer.status().current_page;
        self.serializer
            .sync_options(self.config.view_options(current))
            .await?;
        self.engine.invoke(EngineMethod::RedoLayout, vec![]).await;
        let pages = self.page_count().await?;
        self.serializer.set_page_bounds(current, pages);
        Ok(())
    }

    fn show_page(&self, page: u32) {
        let status = self.serializer.status();
        self.serializer.set_page_bounds(page, status.page_count);
        let now = self.serializer.status().current_page;
        if now != status.current_page {
            self.events.dispatch(&Event::PageChange { page: now });
        }
    }

    async fn replay(&mut self, steps: Vec<ScriptStep>) -> Result<ReplayTally> {
        let mut tally = ReplayTally::default();
        for (index, step) in steps.into_iter().enumerate() {
            match step {
                ScriptStep::Select { select } => {
                    if let Some(first) = select.first() {
                        self.events.dispatch(&Event::SelectionChange {
                            element_id: first.element_id.clone(),
                            element_type: first.element_type.as_str().to_string(),
                            origin: None,
                        });
                    }
                    self.selection.replace(SelectionSet::new(select));
                }
                ScriptStep::Zoom { zoom } => self.apply_zoom(zoom).await?,
                ScriptStep::Page { page } => self.show_page(page),
                ScriptStep::Gesture(gesture) => {
                    let options = self
                        .config
                        .view_options(self.serializer.status().current_page);
                    let outcome = self
                        .serializer
                        .submit(gesture, options)
                        .await
                        .with_context(|| format!("script step {index}"))?;
                    tally.record(&outcome);
                }
            }
        }
        info!(
            target: "runtime.script",
            applied = tally.applied,
            rejected = tally.rejected,
            skipped = tally.skipped,
            "script_replayed"
        );
        Ok(tally)
    }

    async fn export_to(&self, path: &Path) -> Result<ExportFormat> {
        let format = ExportFormat::from_path(path)
            .with_context(|| format!("no export format for {}", path.display()))?;
        let bytes = match format {
            ExportFormat::Mei => self.current_mei().await?.into_bytes(),
            ExportFormat::Svg => self.render_current().await?.into_bytes(),
            ExportFormat::Pdf => {
                let options = serde_json::to_value(self.config.view_options(1))?;
                let mei = self.current_mei().await?;
                match self
                    .export
                    .invoke(ExportMethod::RenderToPdf, vec![json!(mei), options])
                    .await
                {
                    Value::String(pdf) => pdf.into_bytes(),
                    other => bail!("export peer returned `{other}` for the pdf"),
                }
            }
            ExportFormat::Midi => {
                let mei = self.current_mei().await?;
                let raw = self
                    .export
                    .invoke(ExportMethod::RenderToMidi, vec![json!(mei)])
                    .await;
                serde_json::from_value::<Vec<u8>>(raw)
                    .context("export peer returned no midi data")?
            }
        };
        fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
        info!(target: "runtime", format = format.as_str(), size_bytes = bytes.len(), path = %path.display(), "exported");
        Ok(format)
    }

    /// Hang up on every peer and collect their final state.
    async fn shutdown(self) -> ShutdownReport {
        let Session {
            engine,
            validator,
            export,
            serializer,
            tasks,
            ..
        } = self;
        drop(serializer);
        drop(engine);
        drop(validator);
        drop(export);

        let report = ShutdownReport {
            commits: join_peer("engine", tasks.engine).await.map(|e| e.commits()),
            schema: join_peer("validator", tasks.validator)
                .await
                .and_then(|v| v.schema().map(str::to_string)),
            exports: join_peer("export", tasks.export).await.map(|x| x.exports()),
        };
        info!(target: "runtime.shutdown", commits = ?report.commits, exports = ?report.exports, "shutdown_complete");
        report
    }
}

struct Summary {
    document: String,
    pages: u32,
    first_page_bytes: usize,
    tally: Option<ReplayTally>,
    diagnostics: Option<usize>,
    export: Option<(PathBuf, ExportFormat)>,
    updates: u64,
    commits: Option<u64>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "document    {}", self.document)?;
        writeln!(f, "pages       {} (page 1: {} bytes of svg)", self.pages, self.first_page_bytes)?;
        if let Some(t) = &self.tally {
            writeln!(
                f,
                "gestures    {} applied, {} rejected, {} skipped",
                t.applied, t.rejected, t.skipped
            )?;
        }
        match self.diagnostics {
            Some(n) => writeln!(f, "validation  {n} diagnostic(s)")?,
            None => writeln!(f, "validation  skipped (no schema)")?,
        }
        if let Some((path, format)) = &self.export {
            writeln!(f, "export      {} ({})", path.display(), format.as_str())?;
        }
        write!(
            f,
            "updates     {} document update(s), {} commit(s)",
            self.updates,
            self.commits.unwrap_or_default()
        )
    }
}

fn log_telemetry() {
    info!(
        target: "runtime.telemetry",
        transactions_applied = core_actions::TRANSACTIONS_APPLIED.load(Ordering::Relaxed),
        transactions_rejected = core_actions::TRANSACTIONS_REJECTED.load(Ordering::Relaxed),
        gestures_deferred = core_actions::GESTURES_DEFERRED.load(Ordering::Relaxed),
        gestures_skipped = core_actions::GESTURES_SKIPPED.load(Ordering::Relaxed),
        events_dispatched = core_events::EVENTS_DISPATCHED.load(Ordering::Relaxed),
        handlers_invoked = core_events::HANDLERS_INVOKED.load(Ordering::Relaxed),
        "session_telemetry"
    );
}

async fn run(args: Args) -> Result<Summary> {
    let config = load_from(args.config.clone()).context("loading configuration")?;
    info!(
        target: "runtime.startup",
        config_override = args.config.is_some(),
        effective_scale = config.effective_scale,
        "config_loaded"
    );

    let (document, text) = match &args.document {
        Some(path) => (
            path.display().to_string(),
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        ),
        None => ("(welcome)".to_string(), WELCOME_DOCUMENT.to_string()),
    };

    let mut session = Session::start(config).await?;
    let pages = session.load(&text).await?;
    let first_page_bytes = session.render_current().await?.len();

    let tally = match &args.script {
        Some(path) => Some(session.replay(script::load(path)?).await?),
        None => None,
    };
    let diagnostics = session.validate().await?.map(|d| d.len());
    let export = match &args.export {
        Some(path) => Some((path.clone(), session.export_to(path).await?)),
        None => None,
    };
    let pages = session.serializer.status().page_count.max(pages);
    let updates = session.updates.load(Ordering::Relaxed);
    let report = session.shutdown().await;
    log_telemetry();

    Ok(Summary {
        document,
        pages,
        first_page_bytes,
        tally,
        diagnostics,
        export,
        updates,
        commits: report.commits,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    let args = startup.run()?;
    match run(args).await {
        Ok(summary) => {
            println!("{summary}");
            Ok(())
        }
        Err(err) => {
            error!(target: "runtime", ?err, "session_failed");
            Err(err)
        }
    }
}
