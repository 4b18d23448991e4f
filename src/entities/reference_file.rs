// 📁 Reference Files - every file the pipeline wrote or consumed
// Identity is the UUID; the SHA-256 of the content detects re-delivered inbound files.

use crate::db::{format_timestamp, parse_column, parse_timestamp, parse_uuid};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceFileType {
    AuditReport,
    AuditRejectFile,
    AchFile,
    WritebackFile,
}

impl ReferenceFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceFileType::AuditReport => "audit_report",
            ReferenceFileType::AuditRejectFile => "audit_reject_file",
            ReferenceFileType::AchFile => "ach_file",
            ReferenceFileType::WritebackFile => "writeback_file",
        }
    }
}

impl FromStr for ReferenceFileType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "audit_report" => Ok(ReferenceFileType::AuditReport),
            "audit_reject_file" => Ok(ReferenceFileType::AuditRejectFile),
            "ach_file" => Ok(ReferenceFileType::AchFile),
            "writeback_file" => Ok(ReferenceFileType::WritebackFile),
            other => Err(format!("unknown reference file type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub reference_file_id: Uuid,
    pub file_type: ReferenceFileType,
    pub file_location: String,
    pub sha256: String,
    pub import_log_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ReferenceFile {
    pub fn new(file_type: ReferenceFileType, location: &Path, content: &[u8], import_log_id: Option<i64>) -> Self {
        ReferenceFile {
            reference_file_id: Uuid::new_v4(),
            file_type,
            file_location: location.display().to_string(),
            sha256: sha256_hex(content),
            import_log_id,
            created_at: Utc::now(),
        }
    }
}

pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

pub fn insert_reference_file(conn: &Connection, file: &ReferenceFile) -> Result<()> {
    conn.execute(
        "INSERT INTO reference_files (reference_file_id, file_type, file_location, sha256, import_log_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            file.reference_file_id.to_string(),
            file.file_type.as_str(),
            file.file_location,
            file.sha256,
            file.import_log_id,
            format_timestamp(file.created_at),
        ],
    )?;
    Ok(())
}

fn reference_file_from_row(row: &Row<'_>) -> rusqlite::Result<ReferenceFile> {
    let reference_file_id: String = row.get(0)?;
    let file_type: String = row.get(1)?;
    let created_at: String = row.get(5)?;
    Ok(ReferenceFile {
        reference_file_id: parse_uuid(&reference_file_id)?,
        file_type: parse_column(&file_type)?,
        file_location: row.get(2)?,
        sha256: row.get(3)?,
        import_log_id: row.get(4)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub fn find_by_sha256(
    conn: &Connection,
    file_type: ReferenceFileType,
    sha256: &str,
) -> Result<Option<ReferenceFile>> {
    let file = conn
        .query_row(
            "SELECT reference_file_id, file_type, file_location, sha256, import_log_id, created_at
             FROM reference_files WHERE file_type = ?1 AND sha256 = ?2
             ORDER BY created_at LIMIT 1",
            params![file_type.as_str(), sha256],
            reference_file_from_row,
        )
        .optional()?;
    Ok(file)
}

pub fn reference_files_of_type(conn: &Connection, file_type: ReferenceFileType) -> Result<Vec<ReferenceFile>> {
    let mut stmt = conn.prepare(
        "SELECT reference_file_id, file_type, file_location, sha256, import_log_id, created_at
         FROM reference_files WHERE file_type = ?1 ORDER BY created_at",
    )?;
    let files = stmt
        .query_map(params![file_type.as_str()], reference_file_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_duplicate_lookup_by_hash() {
        let conn = open_in_memory().unwrap();
        let file = ReferenceFile::new(
            ReferenceFileType::AuditRejectFile,
            Path::new("/data/audit/processed/reject.csv"),
            b"PFML Payment Id\n",
            None,
        );
        insert_reference_file(&conn, &file).unwrap();

        let found = find_by_sha256(&conn, ReferenceFileType::AuditRejectFile, &file.sha256).unwrap();
        assert_eq!(found.map(|f| f.reference_file_id), Some(file.reference_file_id));

        let other_type = find_by_sha256(&conn, ReferenceFileType::AuditReport, &file.sha256).unwrap();
        assert!(other_type.is_none());
        assert_eq!(reference_files_of_type(&conn, ReferenceFileType::AuditRejectFile).unwrap().len(), 1);
    }
}
