// Actionability
//
// Before an action is dispatched the target must resolve to exactly one
// element that satisfies the action's requirements. The wait polls fresh
// snapshots until the requirements hold or the deadline passes; a bounding
// box counts as stable once two consecutive polls agree.

use crate::actions::Action;
use crate::backend::{BoundingBox, ElementState, PageBackend};
use crate::error::{Error, Result};
use crate::selector::Selector;
use std::time::Duration;
use tokio::time::Instant;

/// Re-poll delay while only stability is pending, about one frame
const STABILITY_FRAME: Duration = Duration::from_millis(16);

/// Conditions an element must meet before an action runs. Attachment is
/// always required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Requirements {
    pub visible: bool,
    pub stable: bool,
    pub enabled: bool,
    pub editable: bool,
    pub unobscured: bool,
}

impl Requirements {
    /// Pointer and keyboard actions
    pub const POINTER: Self = Self {
        visible: true,
        stable: true,
        enabled: true,
        editable: false,
        unobscured: true,
    };

    pub const HOVER: Self = Self {
        visible: true,
        stable: true,
        enabled: false,
        editable: false,
        unobscured: false,
    };

    /// fill and clear
    pub const EDIT: Self = Self {
        editable: true,
        ..Self::POINTER
    };

    /// set_input_files; hidden file inputs behind styled buttons are common
    pub const ATTACHED_ENABLED: Self = Self {
        visible: false,
        stable: false,
        enabled: true,
        editable: false,
        unobscured: false,
    };

    pub fn for_action(action: &Action) -> Self {
        match action {
            Action::Hover => Self::HOVER,
            Action::Fill(_) => Self::EDIT,
            Action::SetInputFiles(_) => Self::ATTACHED_ENABLED,
            _ => Self::POINTER,
        }
    }

    /// First condition `state` fails, given the box seen on the previous poll
    pub fn unmet(
        &self,
        state: &ElementState,
        previous_box: Option<Option<BoundingBox>>,
    ) -> Option<&'static str> {
        if !state.attached {
            return Some("not attached");
        }
        if self.visible && !state.visible {
            return Some("not visible");
        }
        if self.stable && previous_box != Some(state.bounding_box) {
            return Some("not stable");
        }
        if self.enabled && !state.enabled {
            return Some("not enabled");
        }
        if self.editable && !state.editable {
            return Some("not editable");
        }
        if self.unobscured && state.obscured {
            return Some("obscured by another element");
        }
        None
    }
}

/// What a precheck decided about the element it saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Keep waiting for the requirements, then dispatch
    Proceed,
    /// The action's effect already holds; nothing to dispatch
    Done,
}

/// One bounded actionability wait
pub(crate) struct Wait<'a> {
    pub page: &'a dyn PageBackend,
    pub selector: &'a Selector,
    pub operation: &'a str,
    pub timeout: Duration,
    pub deadline: Instant,
    pub poll_interval: Duration,
}

impl Wait<'_> {
    /// Polls until one element matches and meets `requirements`.
    ///
    /// `precheck` runs on every single-element snapshot before the
    /// requirements; an error from it ends the wait at once.
    ///
    /// # Errors
    ///
    /// - `Error::StrictModeViolation` as soon as several elements match
    /// - `Error::ElementNotFound` if nothing matches at the deadline
    /// - `Error::Timeout` naming the unmet condition otherwise
    pub async fn until<F>(
        &self,
        requirements: Requirements,
        precheck: F,
    ) -> Result<(ElementState, Readiness)>
    where
        F: Fn(&ElementState) -> Result<Readiness>,
    {
        let mut previous_box = None;

        loop {
            let mut states = self.page.query(self.selector).await?;
            let mut delay = self.poll_interval;
            let (found, unmet) = match states.len() {
                0 => {
                    previous_box = None;
                    (false, "not attached")
                }
                1 => {
                    let state = states.remove(0);
                    if precheck(&state)? == Readiness::Done {
                        return Ok((state, Readiness::Done));
                    }
                    match requirements.unmet(&state, previous_box) {
                        None => return Ok((state, Readiness::Proceed)),
                        Some(reason) => {
                            tracing::trace!("{} on {}: {}", self.operation, self.selector, reason);
                            if reason == "not stable" {
                                delay = STABILITY_FRAME;
                            }
                            previous_box = Some(state.bounding_box);
                            (true, reason)
                        }
                    }
                }
                count => {
                    return Err(Error::StrictModeViolation {
                        selector: self.selector.to_string(),
                        count,
                    });
                }
            };

            let now = Instant::now();
            if now >= self.deadline {
                return Err(if found {
                    Error::timeout(
                        format!("{}: {} (selector '{}')", self.operation, unmet, self.selector),
                        self.timeout,
                    )
                } else {
                    Error::not_found(self.selector.to_string(), self.operation)
                });
            }
            tokio::time::sleep(delay.min(self.deadline - now)).await;
        }
    }
}
