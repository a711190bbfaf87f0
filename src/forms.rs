use std::collections::HashMap;

use anyhow::Context;
use axum::extract::Multipart;

use crate::storage::UploadedFile;

/// Text fields and file parts of a `multipart/form-data` body.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl MultipartForm {
    pub async fn read(mut mp: Multipart) -> anyhow::Result<Self> {
        let mut form = Self::default();
        while let Some(field) = mp.next_field().await.context("read multipart field")? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let body = field.bytes().await.context("read file part")?;
                    // Browsers send an empty part when no file was chosen.
                    if !filename.is_empty() && !body.is_empty() {
                        form.files.insert(name, UploadedFile { filename, body });
                    }
                }
                None => {
                    let value = field.text().await.context("read text part")?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    /// Trimmed value, `None` when missing or blank.
    pub fn get(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Raw value (passwords are not trimmed), `None` when missing or empty.
    pub fn raw(&self, name: &str) -> Option<String> {
        self.fields.get(name).filter(|v| !v.is_empty()).cloned()
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }
}
