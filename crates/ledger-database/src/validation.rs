//! Field rules for sessions.

use crate::{Session, ValidationError};
use chrono::Local;

/// Upper bound for initial and final investment.
pub const MAX_INVESTMENT: i64 = 1_000_000;

/// Upper bound for the return amount.
pub const MAX_RETURN: i64 = 10_000_000;

pub(crate) fn validate_session(session: &Session) -> Result<(), ValidationError> {
    if session.user_id.trim().is_empty() {
        return Err(ValidationError::new("user_id", "User id is required"));
    }

    validate_name("store_name", "Store name", &session.store_name, false)?;
    validate_name("machine_name", "Machine name", &session.machine_name, true)?;

    check_range(
        "initial_investment",
        "Initial investment",
        session.initial_investment,
        MAX_INVESTMENT,
    )?;

    if session.date > Local::now().date_naive() {
        return Err(ValidationError::new("date", "Date cannot be in the future"));
    }

    if session.is_completed {
        validate_completion(session)
    } else if session.end_time.is_some()
        || session.final_investment.is_some()
        || session.return_amount.is_some()
        || session.profit.is_some()
    {
        Err(ValidationError::new(
            "is_completed",
            "End time and final amounts can only be set by completing the session",
        ))
    } else {
        Ok(())
    }
}

fn validate_completion(session: &Session) -> Result<(), ValidationError> {
    let end_time = session
        .end_time
        .ok_or_else(|| ValidationError::new("end_time", "End time is required"))?;
    let final_investment = session
        .final_investment
        .ok_or_else(|| ValidationError::new("final_investment", "Final investment is required"))?;
    let return_amount = session
        .return_amount
        .ok_or_else(|| ValidationError::new("return_amount", "Return amount is required"))?;

    check_range(
        "final_investment",
        "Final investment",
        final_investment,
        MAX_INVESTMENT,
    )?;
    check_range("return_amount", "Return amount", return_amount, MAX_RETURN)?;

    if end_time <= session.start_time {
        return Err(ValidationError::new(
            "end_time",
            "End time must be after start time",
        ));
    }

    if final_investment < session.initial_investment {
        return Err(ValidationError::new(
            "final_investment",
            "Final investment cannot be less than initial investment",
        ));
    }

    Ok(())
}

fn check_range(field: &str, label: &str, value: i64, max: i64) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::new(
            field,
            format!("{} must be 0 or greater", label),
        ));
    }
    if value > max {
        return Err(ValidationError::new(
            field,
            format!("{} must be at most {}", label, max),
        ));
    }
    Ok(())
}

fn validate_name(
    field: &str,
    label: &str,
    value: &str,
    allow_parens: bool,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, format!("{} is required", label)));
    }
    if !value.chars().all(|c| is_name_char(c, allow_parens)) {
        return Err(ValidationError::new(
            field,
            format!("{} contains invalid characters", label),
        ));
    }
    Ok(())
}

/// ASCII alphanumerics, hiragana, katakana, CJK ideographs, whitespace, `-`, `_`.
pub fn is_name_char(c: char, allow_parens: bool) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || matches!(c,
            '\u{3040}'..='\u{309F}'
            | '\u{30A0}'..='\u{30FF}'
            | '\u{4E00}'..='\u{9FAF}'
            | '-'
            | '_')
        || (allow_parens && matches!(c, '(' | ')'))
}
