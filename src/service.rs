// JSON request/response adapter mirroring the web form endpoint.
//
// The HTTP layer itself lives elsewhere; this turns a request body into a
// zip bundle on disk plus the response document the form expects.
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::config::AppConfig;
use crate::error::{PanelError, Result, StatusClass};
use crate::loader::AreaSource;
use crate::output::{bundle_name, bundle_zip, panel_artifacts, write_artifacts, Artifact};
use crate::panel::assemble;
use crate::types::{PanelRequest, Tier};
use crate::util::parse_year_safe;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    start_year: Value,
    end_year: Value,
    levels: Vec<String>,
    #[serde(default)]
    include_parent: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Downloads {
    pub zip_file: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub downloads: Downloads,
    pub start_year: i32,
    pub end_year: i32,
    pub levels: Vec<Tier>,
    pub include_parent: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerateResponse {
    Success { meta: ResponseMeta },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: u16,
    pub body: GenerateResponse,
}

fn year_value(v: &Value) -> Result<i32> {
    let parsed = match v {
        Value::Number(n) => n
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 10_000.0)
                    .map(|f| f as i32)
            }),
        Value::String(s) => parse_year_safe(Some(s)),
        _ => None,
    };
    parsed.ok_or_else(|| PanelError::InvalidRequest(format!("invalid year format: {}", v)))
}

/// Decode and validate a request body.
pub fn parse_request(body: &str) -> Result<PanelRequest> {
    let body: GenerateBody = serde_json::from_str(body)
        .map_err(|e| PanelError::InvalidRequest(format!("malformed request body: {}", e)))?;
    let start = year_value(&body.start_year)?;
    let end = year_value(&body.end_year)?;
    let tiers = body
        .levels
        .iter()
        .map(|l| l.parse::<Tier>())
        .collect::<Result<BTreeSet<Tier>>>()?;
    PanelRequest::new(start, end, tiers, body.include_parent)
}

fn generate(
    body: &str,
    config: &AppConfig,
    source: &dyn AreaSource,
    now: DateTime<Local>,
) -> Result<ResponseMeta> {
    let request = parse_request(body)?;
    request.check_supported(config.first_year, config.last_year)?;

    let (records, _) = source.load(&request.required_tiers(), request.span)?;
    let panel = assemble(&request, &records)?;
    let artifacts = panel_artifacts(&panel, now)?;

    let bundle = Artifact {
        file_name: bundle_name(request.span, now),
        rows: artifacts.iter().map(|a| a.rows).sum(),
        bytes: bundle_zip(&artifacts)?,
    };
    write_artifacts(&config.download_dir, std::slice::from_ref(&bundle))?;

    Ok(ResponseMeta {
        downloads: Downloads {
            zip_file: format!(
                "{}/{}",
                config.download_url_prefix.trim_end_matches('/'),
                bundle.file_name
            ),
        },
        start_year: request.span.start,
        end_year: request.span.end,
        levels: request.tiers.iter().copied().collect(),
        include_parent: request.include_parent,
    })
}

/// Run one request end to end; failures become an error document.
pub fn handle_generate(
    body: &str,
    config: &AppConfig,
    source: &dyn AreaSource,
    now: DateTime<Local>,
) -> Outcome {
    match generate(body, config, source, now) {
        Ok(meta) => {
            log::info!("Generated {}", meta.downloads.zip_file);
            Outcome {
                status: 200,
                body: GenerateResponse::Success { meta },
            }
        }
        Err(e) => {
            let class = e.status_class();
            match class {
                StatusClass::ClientInput => log::warn!("Rejected request: {}", e),
                StatusClass::ProcessingFailure => log::error!(
                    "Request failed against {} (retryable: {}): {}",
                    source.describe(),
                    e.is_retryable(),
                    e
                ),
            }
            Outcome {
                status: class.http_status(),
                body: GenerateResponse::Error {
                    message: e.to_string(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::DatabaseSource;
    use chrono::TimeZone;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::tempdir;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 9, 7, 1).unwrap()
    }

    fn setup(dir: &Path) -> (AppConfig, DatabaseSource) {
        let db = dir.join("areas.db");
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE adminarea (AreaCode INTEGER, Level TEXT, Catalog TEXT, Y2014 TEXT, Y2015 TEXT);
             INSERT INTO adminarea VALUES (110000, '省级', '直辖市', '北京市', '北京市');
             INSERT INTO adminarea VALUES (340000, '省级', '省', '安徽省', '安徽省');
             INSERT INTO adminarea VALUES (340100, '地级', '地级市', '合肥市', '合肥市');",
        )
        .unwrap();
        let config = AppConfig {
            database_path: db.clone(),
            download_dir: dir.join("downloads"),
            ..AppConfig::default()
        };
        (config, DatabaseSource::new(db, "adminarea"))
    }

    #[test]
    fn test_parse_request_accepts_string_years() {
        let req = parse_request(
            r#"{"startYear": "2014", "endYear": 2015, "levels": ["city", "county"], "includeParent": true}"#,
        )
        .unwrap();
        assert_eq!((req.span.start, req.span.end), (2014, 2015));
        assert!(req.tiers.contains(&Tier::County));
        assert!(req.include_parent);
    }

    #[test]
    fn test_parse_request_accepts_integral_float_years() {
        let req = parse_request(r#"{"startYear": 2014.0, "endYear": "2015.0", "levels": ["city"]}"#)
            .unwrap();
        assert_eq!((req.span.start, req.span.end), (2014, 2015));
        let err = parse_request(r#"{"startYear": 2014.5, "endYear": 2015, "levels": ["city"]}"#)
            .unwrap_err();
        assert!(matches!(err, PanelError::InvalidRequest(_)));
    }

    #[test]
    fn test_parse_request_rejects_bad_year() {
        let err = parse_request(r#"{"startYear": "abc", "endYear": 2015, "levels": ["city"]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid year format"));
    }

    #[test]
    fn test_success_writes_bundle() {
        let dir = tempdir().unwrap();
        let (config, source) = setup(dir.path());
        let outcome = handle_generate(
            r#"{"startYear": 2014, "endYear": 2015, "levels": ["city"], "includeParent": true}"#,
            &config,
            &source,
            now(),
        );
        assert_eq!(outcome.status, 200);
        let GenerateResponse::Success { meta } = outcome.body else {
            panic!("expected success, got {:?}", outcome.body);
        };
        assert_eq!(
            meta.downloads.zip_file,
            "/xzqh/static/downloads/20240305090701000_panel_data_2014_2015.zip"
        );
        assert!(config
            .download_dir
            .join("20240305090701000_panel_data_2014_2015.zip")
            .exists());

        let json = serde_json::to_value(GenerateResponse::Success { meta }).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["meta"]["levels"][0], "city");
        assert_eq!(json["meta"]["includeParent"], true);
    }

    #[test]
    fn test_client_errors_are_400() {
        let dir = tempdir().unwrap();
        let (config, source) = setup(dir.path());
        let outcome = handle_generate(
            r#"{"startYear": 2014, "endYear": 2015, "levels": ["province"], "includeParent": true}"#,
            &config,
            &source,
            now(),
        );
        assert_eq!(outcome.status, 400);
        let json = serde_json::to_value(&outcome.body).unwrap();
        assert_eq!(json["status"], "error");
    }

    #[test]
    fn test_missing_year_column_is_500() {
        let dir = tempdir().unwrap();
        let (config, source) = setup(dir.path());
        let outcome = handle_generate(
            r#"{"startYear": 2014, "endYear": 2016, "levels": ["city"], "includeParent": false}"#,
            &config,
            &source,
            now(),
        );
        assert_eq!(outcome.status, 500);
        assert!(!config.download_dir.exists());
    }
}
