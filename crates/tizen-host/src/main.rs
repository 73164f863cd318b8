//! Tizen Host - runs a JavaScript application against the Tizen web APIs
//!
//! The host embeds a deno_core `JsRuntime` with the `tizen.time` and
//! `tizen.application` extensions installed, and executes the entry module
//! named in `tizen.toml`.
//!
//! # Initialization Flow
//!
//! 1. **Parse tizen.toml** - App metadata, module settings, permissions
//! 2. **Initialize capabilities** - Permission adapter from the manifest
//! 3. **Build services** - `ApplicationManager` over the platform, `TimeUtil`
//! 4. **Create Deno runtime** - `JsRuntime` with both extensions
//! 5. **Setup module loader** - Map `tizen:*` specifiers to extensions
//! 6. **Execute entry module** - Run until the event loop is idle
//!
//! # Dev Mode
//!
//! When launched with `--dev` every permission is allowed.
//!
//! # Module Loader
//!
//! [`TizenModuleLoader`] maps specifiers:
//! - `tizen:application` → `ext:tizen_application/init.js`
//! - `tizen:time_util` → `ext:tizen_time_util/init.js`
//! - `file://...` → local JavaScript files

use anyhow::{Context, Result};
use deno_core::error::ModuleLoaderError;
use deno_core::{
    JsRuntime, ModuleLoadOptions, ModuleLoadReferrer, ModuleLoadResponse, ModuleSourceCode,
    ModuleSpecifier, ResolutionKind, RuntimeOptions,
};
use ext_application::{ApplicationConfig, ApplicationManager, SimulatedPlatform};
use ext_time_util::{TimeUtil, TimeUtilConfig};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

mod capabilities;

use capabilities::{ApplicationCapabilityAdapter, Capabilities, Permissions};

const USAGE: &str = "Usage: tizen-host [--manifest <path>] [--dev]";

/// Host manifest (tizen.toml)
#[derive(Debug, Deserialize, Clone)]
pub struct Manifest {
    pub app: App,
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub time_util: TimeUtilConfig,
    #[serde(alias = "capabilities")]
    pub permissions: Option<Permissions>,
}

/// Application metadata
#[derive(Debug, Deserialize, Clone)]
pub struct App {
    /// Display name of the application
    pub name: String,
    /// Tizen application id (e.g., "org.example.clock")
    pub id: String,
    /// Entry module, relative to the manifest (default: "main.js")
    pub entry: Option<String>,
}

impl Manifest {
    fn entry_path(&self, manifest_dir: &Path) -> PathBuf {
        manifest_dir.join(self.app.entry.as_deref().unwrap_or("main.js"))
    }
}

/// Module loader for the Tizen host
///
/// Maps `tizen:*` specifiers to extension init modules and loads plain
/// JavaScript files from disk.
struct TizenModuleLoader;

impl deno_core::ModuleLoader for TizenModuleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, ModuleLoaderError> {
        if let Some(module_name) = specifier.strip_prefix("tizen:") {
            let ext_specifier = format!("ext:tizen_{}/init.js", module_name);
            return ModuleSpecifier::parse(&ext_specifier)
                .map_err(|e| ModuleLoaderError::generic(format!("Invalid specifier: {}", e)));
        }

        deno_core::resolve_import(specifier, referrer)
            .map_err(|e| ModuleLoaderError::generic(e.to_string()))
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleLoadReferrer>,
        _options: ModuleLoadOptions,
    ) -> ModuleLoadResponse {
        // Extension modules (ext:*) are handled by deno_core automatically
        if module_specifier.scheme() == "ext" {
            return ModuleLoadResponse::Sync(Err(ModuleLoaderError::generic(format!(
                "Extension module should be handled by deno_core: {}",
                module_specifier
            ))));
        }

        let module_specifier = module_specifier.clone();

        ModuleLoadResponse::Sync((move || {
            let path = module_specifier.to_file_path().map_err(|_| {
                ModuleLoaderError::generic(format!(
                    "Cannot convert to file path: {}",
                    module_specifier
                ))
            })?;

            let module_type = match path.extension().and_then(|e| e.to_str()) {
                Some("js") | Some("mjs") => deno_core::ModuleType::JavaScript,
                Some("json") => deno_core::ModuleType::Json,
                other => {
                    return Err(ModuleLoaderError::generic(format!(
                        "Unsupported module type: {:?}",
                        other
                    )));
                }
            };

            let code = std::fs::read_to_string(&path).map_err(|e| {
                ModuleLoaderError::generic(format!("Failed to read {}: {}", path.display(), e))
            })?;

            Ok(deno_core::ModuleSource::new(
                module_type,
                ModuleSourceCode::String(code.into()),
                &module_specifier,
                None,
            ))
        })())
    }
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    let _guard = rt.enter();

    sync_main(&rt)
}

fn sync_main(rt: &tokio::runtime::Runtime) -> Result<()> {
    // TIZEN_LOG configures the log filter, default "info"
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("TIZEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Parse args: --manifest <path> --dev
    let mut args = env::args().skip(1);
    let mut manifest_path = PathBuf::from("tizen.toml");
    let mut dev_mode = false;
    while let Some(a) = args.next() {
        match a.as_str() {
            "--manifest" => {
                let path = args.next().context("--manifest requires a path")?;
                manifest_path = PathBuf::from(path);
            }
            "--dev" => {
                dev_mode = true;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other => anyhow::bail!("Unknown argument {}\n{}", other, USAGE),
        }
    }

    let manifest_txt = rt
        .block_on(tokio::fs::read_to_string(&manifest_path))
        .with_context(|| format!("reading manifest at {}", manifest_path.display()))?;
    let manifest: Manifest = toml::from_str(&manifest_txt).context("parsing manifest")?;
    let manifest_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    tracing::info!("Starting {} ({})", manifest.app.name, manifest.app.id);

    // Initialize capabilities from manifest permissions
    let capabilities = Capabilities::from_permissions(manifest.permissions.as_ref(), dev_mode)
        .context("initializing capabilities")?;

    if dev_mode {
        tracing::info!("Running in dev mode - all permissions allowed");
    }

    // Platform services
    let platform = Arc::new(SimulatedPlatform::demo(
        &manifest.app.id,
        std::process::id() as i32,
    ));
    let manager = ApplicationManager::new(
        manifest.application.clone(),
        platform.clone(),
        platform,
    )
    .context("starting application manager")?;
    let time_util = Arc::new(TimeUtil::new(manifest.time_util.clone()));

    let mut js = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(TizenModuleLoader)),
        extensions: vec![
            ext_time_util::time_util_extension(),
            ext_application::application_extension(),
        ],
        ..Default::default()
    });

    {
        let op_state = js.op_state();
        let mut state = op_state.borrow_mut();
        ext_time_util::init_time_util_state(&mut state, time_util.clone());
        ext_application::init_application_state(
            &mut state,
            Arc::new(manager),
            Some(ApplicationCapabilityAdapter::new(Arc::new(capabilities))),
        );
    }

    let watcher = time_util.spawn_change_watcher();

    let entry_path = manifest.entry_path(&manifest_dir);
    let entry_path = entry_path
        .canonicalize()
        .with_context(|| format!("Cannot find entry module at {}", entry_path.display()))?;
    let main_specifier = ModuleSpecifier::from_file_path(&entry_path)
        .map_err(|_| anyhow::anyhow!("Invalid path: {}", entry_path.display()))?;

    tracing::info!("Executing {}", entry_path.display());

    let result = rt.block_on(async {
        let module_id = js.load_main_es_module(&main_specifier).await?;
        let evaluation = js.mod_evaluate(module_id);
        js.run_event_loop(deno_core::PollEventLoopOptions::default())
            .await?;
        evaluation.await?;
        Ok::<_, anyhow::Error>(())
    });

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    result?;

    tracing::info!("{} finished", manifest.app.name);
    Ok(())
}
