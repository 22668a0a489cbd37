//! Create a connection from a template

use saga::StepError;
use tracing::info;

use super::templates::{ConnectionSpec, ConnectionTemplates};
use crate::kernel::BaseConnectionService;

/// Render `spec` and create the connection, returning its ID.
pub async fn create_connection(
    spec: &ConnectionSpec,
    templates: &ConnectionTemplates,
    service: &dyn BaseConnectionService,
) -> Result<String, StepError> {
    let payload = templates.render(spec)?;
    let connection_id = service.create_connection(&payload).await?;
    info!(
        connection = %spec.name,
        template = %spec.template,
        connection_id = %connection_id,
        "connection created"
    );
    Ok(connection_id)
}
