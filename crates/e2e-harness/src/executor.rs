// Action executor
//
// Turns a user intent into: an actionability wait, any argument checks that
// depend on the element, and one dispatch to the backend. A dispatch that
// fails transiently (the element was replaced between snapshot and
// dispatch) goes back to waiting while time remains.

use crate::actionability::{Readiness, Requirements, Wait};
use crate::actions::{Action, FilePayload, InputFiles, SelectBy};
use crate::backend::{ElementState, PageBackend};
use crate::error::{Error, Result};
use crate::selector::Selector;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) struct Executor<'a> {
    pub page: &'a dyn PageBackend,
    pub selector: &'a Selector,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Executor<'_> {
    fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    fn wait<'w>(&'w self, operation: &'w str, deadline: Instant) -> Wait<'w> {
        Wait {
            page: self.page,
            selector: self.selector,
            operation,
            timeout: self.timeout,
            deadline,
            poll_interval: self.poll_interval,
        }
    }

    /// Waits for actionability, then dispatches, retrying transient failures
    async fn perform<F>(
        &self,
        action: Action,
        requirements: Requirements,
        deadline: Instant,
        precheck: F,
    ) -> Result<()>
    where
        F: Fn(&ElementState) -> Result<Readiness>,
    {
        let operation = action.name();
        loop {
            let (_, readiness) = self.wait(operation, deadline).until(requirements, &precheck).await?;
            if readiness == Readiness::Done {
                tracing::debug!("{} on {}: already in the requested state", operation, self.selector);
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.page.dispatch(self.selector, &action, remaining).await {
                Ok(()) => {
                    tracing::debug!("{} on {}", action.describe(), self.selector);
                    return Ok(());
                }
                Err(e) if e.is_transient() && Instant::now() < deadline => {
                    tracing::debug!("Retrying {} on {}: {}", operation, self.selector, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Click, hover, fill, press and other actions without element-dependent checks
    pub async fn run(&self, action: Action) -> Result<()> {
        let requirements = Requirements::for_action(&action);
        self.perform(action, requirements, self.deadline(), |_| {
            Ok(Readiness::Proceed)
        })
        .await
    }

    pub async fn set_checked(&self, checked: bool) -> Result<()> {
        let action = Action::SetChecked(checked);
        let operation = action.name();
        let selector = self.selector;
        self.perform(action, Requirements::POINTER, self.deadline(), |state| {
            let Some(current) = state.checked else {
                return Err(Error::not_actionable(
                    selector.to_string(),
                    operation,
                    "not a checkbox or radio button",
                ));
            };
            if !checked && state.is_radio() {
                return Err(Error::not_actionable(
                    selector.to_string(),
                    operation,
                    "radio buttons cannot be unchecked",
                ));
            }
            if !state.enabled {
                return Err(Error::not_actionable(
                    selector.to_string(),
                    operation,
                    "element is disabled",
                ));
            }
            Ok(if current == checked {
                Readiness::Done
            } else {
                Readiness::Proceed
            })
        })
        .await
    }

    pub async fn select_option(&self, by: SelectBy) -> Result<()> {
        let selector = self.selector;
        let precheck = |state: &ElementState| {
            if state.tag != "select" && state.options.is_empty() {
                return Err(Error::not_actionable(
                    selector.to_string(),
                    "select_option",
                    "not a <select> element",
                ));
            }
            let matched = state
                .options
                .iter()
                .enumerate()
                .any(|(index, o)| by.matches(&o.value, &o.label, index));
            if !matched {
                return Err(Error::InvalidInput(format!(
                    "select_option: no option matches {} in '{}'",
                    by, selector
                )));
            }
            Ok(Readiness::Proceed)
        };
        let action = Action::SelectOption(by.clone());
        self.perform(action, Requirements::POINTER, self.deadline(), precheck)
            .await
    }

    /// Checks the input, reads every file, then dispatches. Nothing is read
    /// when the input cannot take the files.
    pub async fn set_input_files(&self, files: InputFiles) -> Result<()> {
        if files.is_empty() {
            return Err(Error::InvalidInput(
                "set_input_files: no files given".to_string(),
            ));
        }
        let selector = self.selector;
        let count = files.len();
        let precheck = |state: &ElementState| {
            if !state.is_file_input() {
                return Err(Error::InvalidInput(format!(
                    "set_input_files: '{}' is not an <input type=file>",
                    selector
                )));
            }
            if count > 1 && !state.multiple {
                return Err(Error::InvalidInput(format!(
                    "set_input_files: '{}' accepts a single file, got {}",
                    selector, count
                )));
            }
            Ok(Readiness::Proceed)
        };

        let deadline = self.deadline();
        self.wait("set_input_files", deadline)
            .until(Requirements::ATTACHED_ENABLED, &precheck)
            .await?;

        let mut payloads = Vec::with_capacity(count);
        for path in files.paths() {
            payloads.push(FilePayload::read(path).await?);
        }
        self.perform(
            Action::SetInputFiles(payloads),
            Requirements::ATTACHED_ENABLED,
            deadline,
            precheck,
        )
        .await
    }
}
