//! Deprecated method names warn through the `log` facade, whichever way
//! they are read.

use std::cell::RefCell;

use confset_classifiers::config::{ConformalConfig, Method};
use log::{Level, LevelFilter, Log, Metadata, Record};

thread_local! {
    static WARNINGS: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

/// Keeps the warnings emitted on the current test thread.
struct CaptureWarnings;

impl Log for CaptureWarnings {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            WARNINGS.with(|w| w.borrow_mut().push(record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureWarnings = CaptureWarnings;

fn take_warnings() -> Vec<String> {
    // Another test may have installed the logger already.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Warn);
    WARNINGS.with(|w| std::mem::take(&mut *w.borrow_mut()))
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[test]
fn json_score_alias_warns() {
    take_warnings();
    let method: Method = serde_json::from_str(r#"{"name": "score"}"#).unwrap();
    assert_eq!(method, Method::Lac);

    let warnings = take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("\"score\" is outdated"));
}

#[test]
fn json_config_with_cumulated_score_warns() {
    take_warnings();
    let config: ConformalConfig =
        serde_json::from_str(r#"{"method": {"name": "cumulated_score"}}"#).unwrap();
    assert_eq!(config.method, Method::Aps);

    let warnings = take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("\"cumulated_score\" is outdated"));
}

#[test]
fn current_names_do_not_warn() {
    take_warnings();
    let method: Method = serde_json::from_str(r#"{"name": "aps"}"#).unwrap();
    assert_eq!(method, Method::Aps);
    assert_eq!("lac".parse::<Method>().unwrap(), Method::Lac);
    assert!(take_warnings().is_empty());
}

// ---------------------------------------------------------------------------
// FromStr
// ---------------------------------------------------------------------------

#[test]
fn string_alias_warns_like_json() {
    take_warnings();
    assert_eq!("score".parse::<Method>().unwrap(), Method::Lac);
    let warnings = take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Deprecated method"));
}
