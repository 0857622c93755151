//! CSV export of leads for admin reporting.

use std::collections::HashMap;
use std::io::Write;

use crate::directory::{DirectoryError, DirectoryRepository};
use crate::leads::domain::Lead;

/// Write `leads` as CSV, resolving location and provider names through the
/// directory. Unknown references render as empty cells rather than failing
/// the export.
pub fn write_leads_csv<W: Write>(
    writer: W,
    leads: &[Lead],
    directory: &dyn DirectoryRepository,
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "id",
        "location",
        "provider",
        "name",
        "phone",
        "email",
        "zip_code",
        "project_type",
        "timing",
        "status",
        "created_at",
    ])?;

    let mut location_names: HashMap<u64, String> = HashMap::new();
    let mut provider_names: HashMap<u64, String> = HashMap::new();

    for lead in leads {
        let location = match location_names.get(&lead.location_id.0) {
            Some(name) => name.clone(),
            None => {
                let name = directory
                    .location(lead.location_id)?
                    .map(|location| location.name)
                    .unwrap_or_default();
                location_names.insert(lead.location_id.0, name.clone());
                name
            }
        };

        let provider = match lead.provider_id {
            Some(id) => match provider_names.get(&id.0) {
                Some(name) => name.clone(),
                None => {
                    let name = directory
                        .provider(id)?
                        .map(|provider| provider.name)
                        .unwrap_or_default();
                    provider_names.insert(id.0, name.clone());
                    name
                }
            },
            None => String::new(),
        };

        csv_writer.write_record([
            lead.id.to_string(),
            location,
            provider,
            lead.name.clone(),
            lead.phone.clone(),
            lead.email.clone(),
            lead.zip_code.clone(),
            lead.project_type.clone(),
            lead.timing.clone(),
            lead.status.label().to_string(),
            lead.created_at.to_rfc3339(),
        ])?;
    }

    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
