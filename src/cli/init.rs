//! tasklink init command implementation
//!
//! Creates the config file and the task store directories.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::{CommonOptions, Context};
use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct InitReport {
    root: PathBuf,
    store: PathBuf,
    created: InitCreated,
}

#[derive(Serialize)]
struct InitCreated {
    config: bool,
    store: bool,
}

pub fn run(common: CommonOptions) -> Result<()> {
    let ctx = Context::load_uninitialized(common.root.as_deref())?;

    std::fs::create_dir_all(&ctx.root)?;
    let created_config = ensure_config(&ctx.root, &ctx.config)?;
    let created_store = !ctx.store.is_initialized();
    ctx.store.init()?;

    let report = InitReport {
        root: ctx.root.clone(),
        store: ctx.store.root().to_path_buf(),
        created: InitCreated {
            config: created_config,
            store: created_store,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_store {
        created_items.push(format!("{}/", ctx.config.store.dir));
    }

    let header = if created_items.is_empty() {
        "tasklink init: nothing to do"
    } else {
        "tasklink init: initialized store"
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("root", ctx.root.display().to_string());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    human.push_next_step("tasklink task new <title>");
    human.push_next_step("tasklink link add depends_on <a> <b>");

    emit_success(common.output(), "init", &report, Some(&human))
}

fn ensure_config(root: &Path, config: &Config) -> Result<bool> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok(false);
    }

    config.save(&config_path)?;
    Ok(true)
}
