//! Running one query against one borrowed instance.

use crate::client::Conn;
use crate::error::{Error, ExecError, ExecStage};
use crate::handler::TextCollector;
use crate::provisioner::Provisioner;
use crate::result::QueryResult;

/// Connect to `instance`, run `sql`, and render the result as text.
///
/// The connection is closed before returning. The instance itself is left to
/// the caller.
pub(crate) async fn run_query<P: Provisioner>(
    provisioner: &P,
    instance: &P::Instance,
    sql: &str,
) -> Result<QueryResult, ExecError> {
    let opts = provisioner
        .endpoint(instance)
        .await
        .map_err(|err| ExecError::new(ExecStage::Endpoint, err.to_string()))?;
    tracing::debug!(endpoint = %opts.redacted_url(), "connecting");

    let mut conn = Conn::new(opts)
        .await
        .map_err(|err| ExecError::from_wire(ExecStage::Connection, &err))?;

    let result = query(&mut conn, sql).await;
    if let Err(err) = conn.close().await {
        tracing::debug!(error = %err, "failed to close connection");
    }
    result
}

async fn query(conn: &mut Conn, sql: &str) -> Result<QueryResult, ExecError> {
    let stmt = conn
        .prepare(sql)
        .await
        .map_err(|err| ExecError::from_wire(ExecStage::Statement, &err))?;

    if !stmt.param_oids.is_empty() {
        return Err(ExecError::new(
            ExecStage::Statement,
            format!(
                "statement declares {} parameter(s) but no values can be bound",
                stmt.param_oids.len()
            ),
        ));
    }

    let columns = stmt
        .column_names()
        .map_err(|err| ExecError::from_wire(ExecStage::Metadata, &err))?;

    let mut collector = TextCollector::new();
    if let Err(err) = conn.execute(&mut collector).await {
        let stage = execute_stage(&err, collector.rows_received());
        return Err(ExecError::from_wire(stage, &err));
    }

    Ok(QueryResult::new(columns, collector.into_rows()))
}

/// A server error before the first row means the statement itself failed.
fn execute_stage(err: &Error, rows_received: usize) -> ExecStage {
    if err.is_server() && rows_received == 0 {
        ExecStage::Statement
    } else {
        ExecStage::Read
    }
}
