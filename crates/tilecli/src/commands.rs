use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};

use tilecore::catalog::{CatalogApi, CatalogFile, HttpCatalogApi};
use tilecore::config::Settings;
use tilecore::controller::{ItemState, Pipeline};
use tilecore::download::{format_size, Progress};
use tilecore::library::Library;

use crate::cli::{Cli, ConfigArgs, ItemArgs, ListArgs};

/// Settings and catalog shared by every subcommand.
pub struct Context {
    settings: Settings,
    settings_path: PathBuf,
    catalog: CatalogFile,
    api: Option<HttpCatalogApi>,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let settings_path = cli.settings.clone().unwrap_or_else(Settings::default_path);
        let settings = Settings::load(&settings_path)?;

        let catalog = if cli.catalog.exists() {
            CatalogFile::read(&cli.catalog)?
        } else {
            tracing::warn!("Catalog {:?} not found, library is empty", cli.catalog);
            CatalogFile::default()
        };

        let api = cli.api.as_ref().map(|url| {
            let api = HttpCatalogApi::new(url);
            match &cli.token {
                Some(token) => api.with_token(token),
                None => api,
            }
        });

        Ok(Self {
            settings,
            settings_path,
            catalog,
            api,
        })
    }

    fn library(&self) -> Library {
        let api: Arc<dyn CatalogApi> = match &self.api {
            Some(api) => Arc::new(api.clone()),
            None => Arc::new(self.catalog.clone()),
        };
        let mut library = Library::new(Arc::new(Pipeline::new(&self.settings, api)));
        for item in self.catalog.items() {
            library.add(item.clone());
        }
        library
    }
}

pub fn list(ctx: Context, args: ListArgs) -> Result<()> {
    let library = ctx.library();
    let items = if args.installed {
        library.filter(true)
    } else if args.available {
        library.filter(false)
    } else {
        library.sorted()
    };

    for controller in items {
        let item = controller.item();
        println!("{:>12}  {:<14}  {}", item.id, controller.state().name(), item.name);
    }
    Ok(())
}

pub fn install(ctx: Context, args: ItemArgs) -> Result<()> {
    let mut library = ctx.library();
    library.on_progress(|_, event| {
        let downloaded = format_size(event.downloaded);
        match (event.progress(), event.total) {
            (Progress::Fraction(f), Some(total)) => eprint!(
                "\rDownloading... {:>3.0}% ({downloaded} of {})",
                f * 100.0,
                format_size(total)
            ),
            _ => eprint!("\rDownloading... {downloaded}"),
        }
        let _ = std::io::stderr().flush();
    });
    library.on_state_changed(|_, state| {
        if *state == ItemState::Installing {
            eprintln!("\nInstalling...");
        }
    });
    library.on_error(|_, notice| eprintln!("\n{notice}"));

    let controller = library
        .get_mut(args.id)
        .with_context(|| format!("Item {} is not in the catalog", args.id))?;
    let name = controller.item().name.clone();
    controller.request_install()?;
    controller.wait();

    match controller.state() {
        ItemState::Installed => {
            println!("{name} installed");
            Ok(())
        }
        state => bail!("{name} is {state} after install"),
    }
}

pub fn run(ctx: Context, args: ItemArgs) -> Result<()> {
    let mut library = ctx.library();
    library.on_error(|_, notice| eprintln!("{notice}"));

    let controller = library
        .get_mut(args.id)
        .with_context(|| format!("Item {} is not in the catalog", args.id))?;
    let name = controller.item().name.clone();
    controller.request_run()?;
    controller.wait();

    let Some(process) = controller.take_process() else {
        bail!("{name} did not start");
    };
    println!("{name} started (pid {})", process.id());

    let mut child = process.into_child();
    // keep the game's pipes drained so it never blocks on a full buffer
    let out = child.stdout.take().map(|mut s| {
        std::thread::spawn(move || std::io::copy(&mut s, &mut std::io::stdout()))
    });
    let err = child.stderr.take().map(|mut s| {
        std::thread::spawn(move || std::io::copy(&mut s, &mut std::io::stderr()))
    });

    let status = child.wait().context("Failed to wait for the game")?;
    for handle in [out, err].into_iter().flatten() {
        let _ = handle.join();
    }
    tracing::info!("{name} exited with {status}");
    Ok(())
}

pub fn config(mut ctx: Context, args: ConfigArgs) -> Result<()> {
    let mut changed = false;
    if let Some(root) = args.library_root {
        ctx.settings.library_root = root;
        changed = true;
    }
    if let Some(cache) = args.cache_dir {
        ctx.settings.cache_dir = cache;
        changed = true;
    }
    if let Some((id, dir)) = args.install_dir {
        ctx.settings.set_install_override(id, dir);
        changed = true;
    }

    if changed {
        ctx.settings.save(&ctx.settings_path)?;
        tracing::info!("Saved settings to {:?}", ctx.settings_path);
    }

    println!("# {}", ctx.settings_path.display());
    println!("{}", ctx.settings.to_json_pretty()?);
    Ok(())
}
