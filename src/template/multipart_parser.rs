use actix_multipart::{Field, Multipart};
use actix_web::HttpResponse;
use futures::StreamExt;
use log::debug;

use super::model::NewVersion;
use crate::ErrorResponse;

#[derive(Debug, thiserror::Error)]
pub enum MultipartParseError {
    #[error("Multipart field error: {0}")]
    FieldError(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid field: {0}")]
    InvalidField(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Invalid UTF-8 data: {0}")]
    Utf8Error(String),
}

impl From<MultipartParseError> for HttpResponse {
    fn from(error: MultipartParseError) -> Self {
        match error {
            MultipartParseError::IoError(_) => HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error(&error.to_string())),
            _ => HttpResponse::BadRequest().json(ErrorResponse::bad_request(&error.to_string())),
        }
    }
}

/// Raw fields of a version upload form.
#[derive(Debug, Default)]
pub struct ParsedVersionUpload {
    pub tag: Option<String>,
    pub message: Option<String>,
    pub docx_file: Option<Vec<u8>>,
    pub json_file: Option<Vec<u8>>,
}

impl ParsedVersionUpload {
    pub fn into_new_version(self) -> Result<NewVersion, MultipartParseError> {
        let tag = self.tag.ok_or(MultipartParseError::MissingField("tag"))?;
        let tag = tag
            .trim()
            .parse()
            .map_err(|e: super::model::InvalidVersionTag| MultipartParseError::InvalidField(e.to_string()))?;
        Ok(NewVersion {
            tag,
            message: self.message.unwrap_or_default(),
            docx: self.docx_file.ok_or(MultipartParseError::MissingField("docx_file"))?,
            example: self.json_file.ok_or(MultipartParseError::MissingField("json_file"))?,
        })
    }
}

pub struct MultipartParser;

impl MultipartParser {
    pub async fn parse_version_multipart(
        mut multipart: Multipart,
    ) -> Result<ParsedVersionUpload, MultipartParseError> {
        let mut upload = ParsedVersionUpload::default();

        while let Some(item) = multipart.next().await {
            let mut field = item.map_err(|e| MultipartParseError::FieldError(e.to_string()))?;
            let name = field
                .content_disposition()
                .and_then(|cd| cd.get_name())
                .map(str::to_string)
                .ok_or_else(|| MultipartParseError::FieldError("Field name not found".to_string()))?;

            let data = read_field(&mut field).await?;
            debug!("Multipart field '{}' with {} bytes", name, data.len());

            match name.as_str() {
                "tag" | "version_tag" => upload.tag = Some(utf8(data)?),
                "message" => upload.message = Some(utf8(data)?),
                "docx_file" => upload.docx_file = Some(data),
                "json_file" => upload.json_file = Some(data),
                _ => debug!("Ignoring unknown multipart field '{}'", name),
            }
        }

        Ok(upload)
    }
}

async fn read_field(field: &mut Field) -> Result<Vec<u8>, MultipartParseError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = field.next().await {
        let data_chunk = chunk.map_err(|e| MultipartParseError::IoError(e.to_string()))?;
        buffer.extend_from_slice(&data_chunk);
    }
    Ok(buffer)
}

fn utf8(data: Vec<u8>) -> Result<String, MultipartParseError> {
    String::from_utf8(data).map_err(|e| MultipartParseError::Utf8Error(e.to_string()))
}
