//! Duplicate policy.
//!
//! A pure decision over the outcome of the registry's atomic create. The
//! create itself is the only existence check; deciding from a separate
//! lookup would reopen the race the atomic insert closes.

use jobstream_config::DuplicateAction;

/// What the pipeline should do after attempting to create a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    /// Fresh job id: dispatch normally.
    Proceed,
    /// Existing job under `skip`: record a duplicate marker, no dispatch.
    Skip,
    /// Existing job under `reprocess`: dispatch again on the same record.
    Reprocess,
    /// Existing job under `error`: reject the message.
    Reject,
}

/// Map the create result and the configured action to a decision.
pub fn decide(created: bool, action: DuplicateAction) -> DuplicateDecision {
    if created {
        return DuplicateDecision::Proceed;
    }
    match action {
        DuplicateAction::Skip => DuplicateDecision::Skip,
        DuplicateAction::Reprocess => DuplicateDecision::Reprocess,
        DuplicateAction::Error => DuplicateDecision::Reject,
    }
}
