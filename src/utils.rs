use crate::resource::Resource;

/// File name to save `resource` under when none was given.
pub fn default_file_name(resource: &Resource) -> String {
    let name = sanitize_filename(&resource.file_name());
    if name.trim_matches(|c| c == '.' || c == '_').is_empty() {
        return format!("download_{}", uuid::Uuid::new_v4());
    }
    name
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(
        |c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_',
        "_",
    )
}
