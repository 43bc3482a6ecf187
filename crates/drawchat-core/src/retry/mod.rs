//! Tool-call retry controller
//!
//! Supervises the automatic repair loop that resubmits to the model when a
//! diagram tool invocation fails. Automatic resends never exceed
//! `max_auto_retries` and never proceed past a usage ceiling.

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::models::{Message, ToolInvocation};
use crate::util::truncate_with_ellipsis;

/// Incremental diagram edit tool.
pub const EDIT_DIAGRAM_TOOL: &str = "edit_diagram";
/// Full redraw tool used as the fallback.
pub const DISPLAY_DIAGRAM_TOOL: &str = "display_diagram";

const ERROR_SUMMARY_MAX_CHARS: usize = 160;

/// Instruction injected once consecutive edit failures trigger the fallback.
pub const FORCE_FULL_REDRAW_INSTRUCTION: &str = "The previous edit_diagram calls failed. \
Do not use edit_diagram for the next attempt. Regenerate the complete diagram with \
display_diagram instead.";

/// Usage ceilings checked before every automatic resend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageLimits {
    pub daily_tokens: Option<u64>,
    pub tokens_per_minute: Option<u64>,
}

/// Usage observed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub tokens_today: u64,
    pub tokens_last_minute: u64,
}

impl UsageLimits {
    /// The first ceiling `usage` has reached, if any.
    pub fn exceeded(&self, usage: &UsageSnapshot) -> Option<String> {
        if let Some(limit) = self.daily_tokens {
            if usage.tokens_today >= limit {
                return Some(format!(
                    "Daily token limit reached ({} / {limit})",
                    usage.tokens_today
                ));
            }
        }
        if let Some(limit) = self.tokens_per_minute {
            if usage.tokens_last_minute >= limit {
                return Some(format!(
                    "Tokens-per-minute limit reached ({} / {limit})",
                    usage.tokens_last_minute
                ));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastAction {
    RetryManually,
    OpenSettings,
    DeleteOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// User-visible notice. Failures always carry at least one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    pub actions: Vec<ToastAction>,
}

/// What the caller should do after a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Last tool call succeeded (or there was none)
    Done,
    /// Resend automatically and await the next model turn
    Resend,
    /// Resend with `instruction` injected so the model redraws from scratch
    ForceFullRedraw { instruction: String, toast: Toast },
    /// Automatic retries exhausted
    Stop { toast: Toast },
    /// A usage ceiling was reached; the loop is cancelled
    QuotaStop { toast: Toast },
}

impl RetryDecision {
    /// Whether the caller should submit another model turn.
    pub const fn resends(&self) -> bool {
        matches!(self, Self::Resend | Self::ForceFullRedraw { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
    limits: UsageLimits,
    auto_retry_count: u32,
    edit_failure_count: u32,
    force_display_next: bool,
}

impl RetryController {
    pub const fn new(config: RetryConfig, limits: UsageLimits) -> Self {
        Self {
            config,
            limits,
            auto_retry_count: 0,
            edit_failure_count: 0,
            force_display_next: false,
        }
    }

    pub const fn auto_retry_count(&self) -> u32 {
        self.auto_retry_count
    }

    pub const fn edit_failure_count(&self) -> u32 {
        self.edit_failure_count
    }

    /// Whether the next attempt must use the full redraw tool.
    pub const fn force_display_next(&self) -> bool {
        self.force_display_next
    }

    pub fn set_limits(&mut self, limits: UsageLimits) {
        self.limits = limits;
    }

    /// A user-initiated send starts a fresh budget.
    pub fn reset_on_user_send(&mut self) {
        self.reset();
    }

    /// Inspect the last tool invocation of a model response.
    pub fn on_response(&mut self, response: &Message, usage: &UsageSnapshot) -> RetryDecision {
        match response.tool_invocations.last() {
            Some(invocation) if invocation.error.is_some() => {
                self.on_tool_error(invocation, usage)
            }
            _ => {
                self.reset();
                RetryDecision::Done
            }
        }
    }

    fn on_tool_error(&mut self, failed: &ToolInvocation, usage: &UsageSnapshot) -> RetryDecision {
        if failed.name == EDIT_DIAGRAM_TOOL {
            self.edit_failure_count += 1;
        } else {
            self.edit_failure_count = 0;
        }

        if self.auto_retry_count >= self.config.max_auto_retries {
            tracing::info!(
                "Stopping automatic retries after {} attempts; last failing tool {}",
                self.auto_retry_count,
                failed.name
            );
            return RetryDecision::Stop {
                toast: Toast {
                    level: ToastLevel::Error,
                    message: failure_summary(failed, self.auto_retry_count),
                    actions: vec![ToastAction::RetryManually, ToastAction::OpenSettings],
                },
            };
        }

        if let Some(reason) = self.limits.exceeded(usage) {
            tracing::info!("Cancelling automatic retry: {reason}");
            return RetryDecision::QuotaStop {
                toast: Toast {
                    level: ToastLevel::Warning,
                    message: format!("{reason}. Automatic retry was cancelled."),
                    actions: vec![ToastAction::OpenSettings, ToastAction::RetryManually],
                },
            };
        }

        self.auto_retry_count += 1;

        if self.edit_failure_count >= self.config.max_edit_failures && !self.force_display_next {
            self.force_display_next = true;
            self.edit_failure_count = 0;
            tracing::debug!("Forcing full redraw after repeated {EDIT_DIAGRAM_TOOL} failures");
            return RetryDecision::ForceFullRedraw {
                instruction: FORCE_FULL_REDRAW_INSTRUCTION.to_string(),
                toast: Toast {
                    level: ToastLevel::Info,
                    message: format!(
                        "Diagram edits kept failing; redrawing with {DISPLAY_DIAGRAM_TOOL}"
                    ),
                    actions: Vec::new(),
                },
            };
        }

        tracing::debug!(
            "Automatic retry {}/{} after {} failed",
            self.auto_retry_count,
            self.config.max_auto_retries,
            failed.name
        );
        RetryDecision::Resend
    }

    fn reset(&mut self) {
        self.auto_retry_count = 0;
        self.edit_failure_count = 0;
        self.force_display_next = false;
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryConfig::default(), UsageLimits::default())
    }
}

fn failure_summary(failed: &ToolInvocation, attempts: u32) -> String {
    let error = failed.error.as_deref().unwrap_or("unknown error");
    format!(
        "{} failed after {attempts} automatic retries: {}",
        failed.name,
        truncate_with_ellipsis(error, ERROR_SUMMARY_MAX_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn failed(tool: &str) -> Message {
        Message::assistant("", 0).with_tool_invocation(ToolInvocation::failed(tool, "bad xml"))
    }

    fn succeeded(tool: &str) -> Message {
        Message::assistant("", 0).with_tool_invocation(ToolInvocation::ok(tool))
    }

    fn usage() -> UsageSnapshot {
        UsageSnapshot::default()
    }

    #[test]
    fn success_resets_counters() {
        let mut controller = RetryController::default();
        assert_eq!(
            controller.on_response(&failed(DISPLAY_DIAGRAM_TOOL), &usage()),
            RetryDecision::Resend
        );
        assert_eq!(controller.auto_retry_count(), 1);

        assert_eq!(
            controller.on_response(&succeeded(DISPLAY_DIAGRAM_TOOL), &usage()),
            RetryDecision::Done
        );
        assert_eq!(controller.auto_retry_count(), 0);
    }

    #[test]
    fn response_without_tools_is_done() {
        let mut controller = RetryController::default();
        assert_eq!(
            controller.on_response(&Message::assistant("hi", 0), &usage()),
            RetryDecision::Done
        );
    }

    #[test]
    fn two_edit_failures_force_full_redraw_then_cap_holds() {
        let mut controller = RetryController::default();

        assert_eq!(
            controller.on_response(&failed(EDIT_DIAGRAM_TOOL), &usage()),
            RetryDecision::Resend
        );
        let decision = controller.on_response(&failed(EDIT_DIAGRAM_TOOL), &usage());
        assert!(matches!(
            decision,
            RetryDecision::ForceFullRedraw { ref instruction, .. }
                if instruction.contains(DISPLAY_DIAGRAM_TOOL)
        ));
        assert!(controller.force_display_next());
        assert_eq!(controller.auto_retry_count(), 2);

        // The forced redraw fails too; the global cap still applies
        assert_eq!(
            controller.on_response(&failed(DISPLAY_DIAGRAM_TOOL), &usage()),
            RetryDecision::Resend
        );
        assert_eq!(controller.auto_retry_count(), 3);
        let decision = controller.on_response(&failed(DISPLAY_DIAGRAM_TOOL), &usage());
        let RetryDecision::Stop { toast } = decision else {
            panic!("expected stop");
        };
        assert!(toast.message.contains(DISPLAY_DIAGRAM_TOOL));
        assert!(toast.message.contains("bad xml"));
        assert_eq!(
            toast.actions,
            vec![ToastAction::RetryManually, ToastAction::OpenSettings]
        );
    }

    #[test]
    fn retry_count_never_exceeds_cap() {
        let mut controller = RetryController::default();
        let tools = [EDIT_DIAGRAM_TOOL, DISPLAY_DIAGRAM_TOOL, "other"];

        let mut resends = 0;
        for step in 0..50 {
            let decision = controller.on_response(&failed(tools[step % tools.len()]), &usage());
            assert!(controller.auto_retry_count() <= 3);
            if decision.resends() {
                resends += 1;
            }
        }
        assert_eq!(resends, 3);
    }

    #[test]
    fn usage_ceiling_cancels_retry_regardless_of_count() {
        let limits = UsageLimits {
            daily_tokens: Some(1_000),
            tokens_per_minute: None,
        };
        let mut controller = RetryController::new(RetryConfig::default(), limits);
        let spent = UsageSnapshot {
            tokens_today: 1_000,
            tokens_last_minute: 0,
        };

        let decision = controller.on_response(&failed(DISPLAY_DIAGRAM_TOOL), &spent);
        let RetryDecision::QuotaStop { toast } = decision else {
            panic!("expected quota stop");
        };
        assert!(toast.message.contains("Daily token limit"));
        assert_eq!(controller.auto_retry_count(), 0);
    }

    #[test]
    fn tokens_per_minute_ceiling() {
        let limits = UsageLimits {
            daily_tokens: None,
            tokens_per_minute: Some(10),
        };
        assert!(limits
            .exceeded(&UsageSnapshot {
                tokens_today: 5_000,
                tokens_last_minute: 11,
            })
            .is_some());
        assert!(limits.exceeded(&UsageSnapshot::default()).is_none());
    }

    #[test]
    fn user_send_resets_budget() {
        let mut controller = RetryController::default();
        for _ in 0..3 {
            controller.on_response(&failed(EDIT_DIAGRAM_TOOL), &usage());
        }
        controller.reset_on_user_send();
        assert_eq!(controller.auto_retry_count(), 0);
        assert!(!controller.force_display_next());
        assert_eq!(
            controller.on_response(&failed(EDIT_DIAGRAM_TOOL), &usage()),
            RetryDecision::Resend
        );
    }
}
