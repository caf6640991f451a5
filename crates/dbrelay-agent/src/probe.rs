//! Connection health probe.

use dbrelay_db::{DbError, Session};

/// Result of one successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Username the backend reports for the connection.
    pub backend_user: String,
}

/// Runs a trivial query and reads back the connection's backend username.
///
/// # Errors
///
/// Fails with the session's error when the query does not return the
/// expected single row.
pub fn probe(session: &mut Session) -> Result<ProbeReport, DbError> {
    let rows = session.execute("SELECT 1 AS ok, current_user() AS user")?;
    let row = rows
        .first()
        .ok_or_else(|| DbError::Query("probe returned no rows".to_string()))?;

    if row.integer("ok") != Some(1) {
        return Err(DbError::Query(format!(
            "probe returned an unexpected value: {:?}",
            row.get("ok")
        )));
    }

    Ok(ProbeReport {
        backend_user: row.text("user").unwrap_or_default().to_string(),
    })
}
