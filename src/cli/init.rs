//! tw init and tw validate
//!
//! `init` writes a default `.tw.toml` and an empty task store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::GlobalOptions;
use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::store::STORE_DIR;

#[derive(Serialize)]
struct InitReport {
    root: PathBuf,
    created: InitCreated,
}

#[derive(Serialize)]
struct InitCreated {
    config: bool,
    store: bool,
}

#[derive(Serialize)]
struct ValidateReport {
    root: PathBuf,
    tasks: usize,
    dependencies: usize,
    recurring: usize,
    by_status: BTreeMap<&'static str, usize>,
}

pub fn run(global: GlobalOptions) -> Result<()> {
    let root = global.root()?;
    std::fs::create_dir_all(&root)?;

    let created_config = ensure_config(&root)?;
    let store = global.open_store()?;
    let created_store = store.init()?;

    let report = InitReport {
        root: root.clone(),
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
        created_items.push(format!("{STORE_DIR}/"));
    }

    let header = if created_items.is_empty() {
        "tw init: nothing to do"
    } else {
        "tw init: initialized task store"
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("root", root.display().to_string());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    human.push_next_step("tw task new \"<title>\"");

    emit_success(global.output(false), "init", &report, Some(&human))
}

/// Load the snapshot, which rejects a hierarchy or dependency cycle.
pub fn run_validate(global: GlobalOptions) -> Result<()> {
    let store = global.open_store()?;
    let snapshot = store.load()?;

    let report = ValidateReport {
        root: store.root().to_path_buf(),
        tasks: snapshot.tasks.len(),
        dependencies: snapshot.dependencies.len(),
        recurring: snapshot.tasks.iter().filter(|task| task.is_recurring()).count(),
        by_status: snapshot.status_counts(),
    };

    let mut human = HumanOutput::new("tw validate: ok");
    human.push_summary("Tasks", report.tasks.to_string());
    human.push_summary("Dependencies", report.dependencies.to_string());
    human.push_summary("Recurring", report.recurring.to_string());
    for (status, count) in &report.by_status {
        human.push_detail(format!("{status}: {count}"));
    }

    emit_success(global.output(false), "validate", &report, Some(&human))
}

fn ensure_config(root: &Path) -> Result<bool> {
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

    Config::default().save(&config_path)?;
    Ok(true)
}
