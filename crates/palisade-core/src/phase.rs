use crate::CoreError;
use palisade_store::Phase;

pub fn validate_transition(from: Phase, to: Phase) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (Phase::Idle, Phase::Applying)
            | (Phase::Applying, Phase::PendingConfirm | Phase::Idle)
            | (Phase::PendingConfirm, Phase::Idle)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(Phase::Idle, Phase::Applying).is_ok());
        assert!(validate_transition(Phase::Applying, Phase::PendingConfirm).is_ok());
        assert!(validate_transition(Phase::Applying, Phase::Idle).is_ok()); // failed apply
        assert!(validate_transition(Phase::PendingConfirm, Phase::Idle).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(Phase::Idle, Phase::PendingConfirm).is_err());
        assert!(validate_transition(Phase::Idle, Phase::Idle).is_err());
        assert!(validate_transition(Phase::PendingConfirm, Phase::Applying).is_err());
        assert!(validate_transition(Phase::PendingConfirm, Phase::PendingConfirm).is_err());
        assert!(validate_transition(Phase::Applying, Phase::Applying).is_err());
    }
}
