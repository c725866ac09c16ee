//! BigQuery REST backend.
//!
//! Uses the v2 JSON API directly: `datasets.list`, `tables.list`,
//! `tables.get` (with a `$YYYYMMDD` partition decorator) and `jobs.query` /
//! `jobs.getQueryResults`. Authentication is a pre-issued OAuth bearer token.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::core::query::Query;
use crate::core::schema::TableFieldSchema;
use crate::core::table::{TableMetadata, TableRef};
use crate::core::traits::{Row, Warehouse};
use crate::error::{CompareError, Result};

const USER_AGENT: &str = concat!("stable-compare/", env!("CARGO_PKG_VERSION"));

/// How long a single `jobs.query` / `getQueryResults` call waits server-side.
const QUERY_WAIT_MS: u64 = 60_000;

/// Which error category a failed call maps to.
#[derive(Clone, Copy)]
enum CallKind {
    Metadata,
    Query,
}

impl CallKind {
    fn error(self, context: &str, message: impl ToString) -> CompareError {
        match self {
            CallKind::Metadata => CompareError::remote_metadata(context, message),
            CallKind::Query => CompareError::query(context, message),
        }
    }
}

/// BigQuery REST client.
pub struct BigQueryClient {
    client: Client,
    api_url: String,
    billing_project: String,
    location: Option<String>,
}

impl BigQueryClient {
    /// Create a client from configuration, reading the bearer token from the
    /// configured environment variable unless one is given directly.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = match &config.warehouse.access_token {
            Some(token) => token.clone(),
            None => std::env::var(&config.warehouse.access_token_env).map_err(|_| {
                CompareError::Config(format!(
                    "no access token: set {} (e.g. from `gcloud auth print-access-token`)",
                    config.warehouse.access_token_env
                ))
            })?,
        };

        let mut client = Self::new(
            &config.warehouse.api_url,
            config.billing_project(),
            &token,
            Duration::from_secs(config.warehouse.timeout_secs),
        )?;
        client.location = config.warehouse.location.clone();
        Ok(client)
    }

    /// Create a client for an explicit endpoint and token.
    pub fn new(
        api_url: &str,
        billing_project: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| CompareError::Config(format!("invalid access token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            billing_project: billing_project.to_string(),
            location: None,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
        kind: CallKind,
        context: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| kind.error(context, e))?;
        Self::parse_response(response, kind, context).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        kind: CallKind,
        context: &str,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| kind.error(context, e))?;
        Self::parse_response(response, kind, context).await
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
        kind: CallKind,
        context: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await.map_err(|e| kind.error(context, e))?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|env| env.error.message)
                .unwrap_or(body);
            return Err(kind.error(context, format!("HTTP {}: {}", status, message)));
        }
        serde_json::from_str(&body).map_err(|e| kind.error(context, e))
    }

    fn query_request(&self, query: &Query, dry_run: bool) -> Result<QueryRequest> {
        let rendered = query.render()?;
        debug!("Rendered query for {}:\n{}", query.table, rendered.sql);

        Ok(QueryRequest {
            query: rendered.sql,
            use_legacy_sql: false,
            dry_run,
            parameter_mode: "NAMED",
            query_parameters: rendered
                .parameters
                .iter()
                .map(|p| WireParameter {
                    name: p.name.clone(),
                    parameter_type: WireParameterType {
                        r#type: p.value.type_name(),
                    },
                    parameter_value: WireParameterValue {
                        value: p.value.to_wire(),
                    },
                })
                .collect(),
            timeout_ms: QUERY_WAIT_MS,
            location: self.location.clone(),
        })
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn list_datasets(&self, project: &str) -> Result<Vec<String>> {
        let url = format!("{}/projects/{}/datasets", self.api_url, project);
        let context = format!("list datasets in {}", project);
        let mut datasets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("all", "true".to_string())];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let page: DatasetList = self
                .get_json(&url, &params, CallKind::Metadata, &context)
                .await?;
            datasets.extend(
                page.datasets
                    .into_iter()
                    .map(|d| d.dataset_reference.dataset_id),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(datasets)
    }

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables",
            self.api_url, project, dataset
        );
        let context = format!("list tables in {}.{}", project, dataset);
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = Vec::new();
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let page: TableList = self
                .get_json(&url, &params, CallKind::Metadata, &context)
                .await?;
            tables.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(tables)
    }

    async fn get_table(
        &self,
        table: &TableRef,
        partition: Option<NaiveDate>,
    ) -> Result<TableMetadata> {
        let table_id = match partition {
            Some(date) => format!("{}${}", table.table, date.format("%Y%m%d")),
            None => table.table.clone(),
        };
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.api_url, table.project, table.dataset, table_id
        );
        let context = format!("get table {}", table);
        let resource: TableResource = self
            .get_json(&url, &[], CallKind::Metadata, &context)
            .await?;

        Ok(TableMetadata {
            num_rows: parse_count(resource.num_rows.as_deref(), &context)?,
            num_bytes: parse_count(resource.num_bytes.as_deref(), &context)?,
            schema: resource.schema.map(|s| s.fields).unwrap_or_default(),
        })
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>> {
        let context = format!("query {}", query.table);
        let request = self.query_request(query, false)?;
        let url = format!("{}/projects/{}/queries", self.api_url, self.billing_project);
        let mut response: QueryResponse = self
            .post_json(&url, &request, CallKind::Query, &context)
            .await?;

        let mut schema = response.schema.take().map(|s| s.fields);
        let mut rows = Vec::new();

        loop {
            if response.job_complete.unwrap_or(true) {
                let fields = schema.as_deref().unwrap_or_default();
                rows.extend(response.rows.iter().map(|r| convert_row(&r.f, fields)));
            }

            let needs_more = !response.job_complete.unwrap_or(true)
                || response.page_token.as_deref().is_some_and(|t| !t.is_empty());
            if !needs_more {
                break;
            }

            let job = response.job_reference.clone().ok_or_else(|| {
                CompareError::query(&context, "incomplete query without a job reference")
            })?;
            let results_url = format!(
                "{}/projects/{}/queries/{}",
                self.api_url, job.project_id, job.job_id
            );
            let mut params = vec![("timeoutMs", QUERY_WAIT_MS.to_string())];
            if response.job_complete.unwrap_or(true) {
                if let Some(token) = response.page_token.clone() {
                    params.push(("pageToken", token));
                }
            }
            if let Some(location) = job.location.clone().or_else(|| self.location.clone()) {
                params.push(("location", location));
            }

            let mut next: QueryResponse = self
                .get_json(&results_url, &params, CallKind::Query, &context)
                .await?;
            if schema.is_none() {
                schema = next.schema.take().map(|s| s.fields);
            }
            next.job_reference = next.job_reference.or(Some(job));
            response = next;
        }

        Ok(rows)
    }

    async fn dry_run(&self, query: &Query) -> Result<u64> {
        let context = format!("dry run {}", query.table);
        let request = self.query_request(query, true)?;
        let url = format!("{}/projects/{}/queries", self.api_url, self.billing_project);
        let response: QueryResponse = self
            .post_json(&url, &request, CallKind::Query, &context)
            .await?;
        parse_count(response.total_bytes_processed.as_deref(), &context)
    }

    fn name(&self) -> &str {
        "bigquery"
    }
}

/// Counts arrive as decimal strings; a missing count means zero.
fn parse_count(value: Option<&str>, context: &str) -> Result<u64> {
    match value {
        None => Ok(0),
        Some(s) => s.parse().map_err(|_| {
            CompareError::remote_metadata(context, format!("invalid count {:?}", s))
        }),
    }
}

/// Convert an `f`/`v` encoded row into an object keyed by field name.
fn convert_row(cells: &[WireCell], fields: &[TableFieldSchema]) -> Row {
    cells
        .iter()
        .zip(fields)
        .map(|(cell, field)| (field.name.clone(), convert_value(&cell.v, field, true)))
        .collect()
}

fn convert_value(value: &Value, field: &TableFieldSchema, allow_repeated: bool) -> Value {
    let repeated = allow_repeated && field.mode.as_deref() == Some("REPEATED");
    match value {
        Value::Null => Value::Null,
        Value::Array(items) if repeated => Value::Array(
            items
                .iter()
                .map(|item| convert_value(item.get("v").unwrap_or(&Value::Null), field, false))
                .collect(),
        ),
        Value::Object(record) => match (record.get("f"), field.fields.as_deref()) {
            (Some(Value::Array(cells)), Some(subfields)) => {
                let mut out = Map::new();
                for (cell, sub) in cells.iter().zip(subfields) {
                    let v = cell.get("v").unwrap_or(&Value::Null);
                    out.insert(sub.name.clone(), convert_value(v, sub, true));
                }
                Value::Object(out)
            }
            _ => value.clone(),
        },
        other => other.clone(),
    }
}

// Wire types

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetListItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListItem {
    dataset_reference: DatasetReference,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListItem {
    table_reference: TableReference,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    num_rows: Option<String>,
    num_bytes: Option<String>,
    schema: Option<WireSchema>,
}

#[derive(Deserialize)]
struct WireSchema {
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    dry_run: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<WireParameter>,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParameter {
    name: String,
    parameter_type: WireParameterType,
    parameter_value: WireParameterValue,
}

#[derive(Serialize)]
struct WireParameterType {
    r#type: &'static str,
}

#[derive(Serialize)]
struct WireParameterValue {
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_complete: Option<bool>,
    total_bytes_processed: Option<String>,
    schema: Option<WireSchema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    page_token: Option<String>,
    job_reference: Option<JobReference>,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize)]
struct WireRow {
    #[serde(default)]
    f: Vec<WireCell>,
}

#[derive(Deserialize)]
struct WireCell {
    #[serde(default)]
    v: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::Server) -> BigQueryClient {
        BigQueryClient::new(&server.url(), "billing", "test-token", Duration::from_secs(5))
            .unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_list_datasets_follows_page_tokens() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/projects/prod/datasets")
            .match_query(Matcher::Exact("all=true".into()))
            .match_header("authorization", "Bearer test-token")
            .with_body(
                json!({
                    "datasets": [{"datasetReference": {"datasetId": "telemetry_stable"}}],
                    "nextPageToken": "page2"
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/projects/prod/datasets")
            .match_query(Matcher::Exact("all=true&pageToken=page2".into()))
            .with_body(
                json!({"datasets": [{"datasetReference": {"datasetId": "telemetry_live"}}]})
                    .to_string(),
            )
            .create_async()
            .await;

        let datasets = client(&server).list_datasets("prod").await.unwrap();
        assert_eq!(datasets, vec!["telemetry_stable", "telemetry_live"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_tables_error_is_remote_metadata() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/projects/prod/datasets/telemetry_stable/tables")
            .with_status(403)
            .with_body(json!({"error": {"code": 403, "message": "Access Denied"}}).to_string())
            .create_async()
            .await;

        let err = client(&server)
            .list_tables("prod", "telemetry_stable")
            .await
            .unwrap_err();
        match err {
            CompareError::RemoteMetadata { message, .. } => {
                assert!(message.contains("Access Denied"));
                assert!(message.contains("403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_table_uses_partition_decorator() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/projects/prod/datasets/telemetry_stable/tables/main_v4$20200101")
            .with_body(
                json!({
                    "numRows": "1500",
                    "numBytes": "1048576",
                    "schema": {"fields": [
                        {"name": "document_id", "type": "STRING", "mode": "NULLABLE"}
                    ]}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let table = TableRef::new("prod", "telemetry_stable", "main_v4");
        let meta = client(&server).get_table(&table, Some(date())).await.unwrap();
        assert_eq!(meta.num_rows, 1500);
        assert_eq!(meta.num_bytes, 1_048_576);
        assert_eq!(meta.column_names(), vec!["document_id"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_dry_run_sends_named_parameters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/projects/billing/queries")
            .match_body(Matcher::PartialJson(json!({
                "dryRun": true,
                "useLegacySql": false,
                "parameterMode": "NAMED",
                "queryParameters": [{
                    "name": "partition_date",
                    "parameterType": {"type": "DATE"},
                    "parameterValue": {"value": "2020-01-01"}
                }]
            })))
            .with_body(json!({"totalBytesProcessed": "2048", "jobComplete": true}).to_string())
            .create_async()
            .await;

        let table = TableRef::new("prod", "telemetry_stable", "main_v4");
        let query = Query::column(&table, "environment", "submission_timestamp", date());
        assert_eq!(client(&server).dry_run(&query).await.unwrap(), 2048);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_collects_pages() {
        let mut server = mockito::Server::new_async().await;
        let schema = json!({"fields": [
            {"name": "document_id", "type": "STRING", "mode": "NULLABLE"},
            {"name": "payload", "type": "STRING", "mode": "NULLABLE"}
        ]});
        let _first = server
            .mock("POST", "/projects/billing/queries")
            .with_body(
                json!({
                    "jobComplete": true,
                    "schema": schema,
                    "rows": [{"f": [{"v": "a"}, {"v": "{\"x\":1}"}]}],
                    "pageToken": "next",
                    "jobReference": {"projectId": "billing", "jobId": "job_1", "location": "US"}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/projects/billing/queries/job_1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pageToken".into(), "next".into()),
                Matcher::UrlEncoded("location".into(), "US".into()),
            ]))
            .with_body(
                json!({
                    "jobComplete": true,
                    "rows": [{"f": [{"v": "b"}, {"v": null}]}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let table = TableRef::new("prod", "telemetry_stable", "main_v4");
        let query = Query::documents(&table, "document_id", "submission_timestamp", date());
        let rows = client(&server).query(&query).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["document_id"], json!("a"));
        assert_eq!(rows[0]["payload"], json!("{\"x\":1}"));
        assert_eq!(rows[1]["payload"], Value::Null);
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_polls_until_job_complete() {
        let mut server = mockito::Server::new_async().await;
        let _start = server
            .mock("POST", "/projects/billing/queries")
            .with_body(
                json!({
                    "jobComplete": false,
                    "jobReference": {"projectId": "billing", "jobId": "job_2", "location": "EU"}
                })
                .to_string(),
            )
            .create_async()
            .await;
        // No pageToken while the job is still running
        let poll = server
            .mock("GET", "/projects/billing/queries/job_2")
            .match_query(Matcher::Exact("timeoutMs=60000&location=EU".into()))
            .with_body(
                json!({
                    "jobComplete": true,
                    "schema": {"fields": [
                        {"name": "document_id", "type": "STRING", "mode": "NULLABLE"}
                    ]},
                    "rows": [{"f": [{"v": "a"}]}, {"f": [{"v": "b"}]}]
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let table = TableRef::new("prod", "telemetry_stable", "main_v4");
        let query = Query::documents(&table, "document_id", "submission_timestamp", date());
        let rows = client(&server).query(&query).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["document_id"], json!("a"));
        assert_eq!(rows[1]["document_id"], json!("b"));
        poll.assert_async().await;
    }

    #[test]
    fn test_convert_nested_and_repeated_cells() {
        let fields = vec![
            TableFieldSchema::leaf("tags", "STRING", "REPEATED"),
            TableFieldSchema::record(
                "geo",
                "NULLABLE",
                vec![TableFieldSchema::leaf("city", "STRING", "NULLABLE")],
            ),
        ];
        let cells: Vec<WireCell> = serde_json::from_value(json!([
            {"v": [{"v": "a"}, {"v": "b"}]},
            {"v": {"f": [{"v": "Berlin"}]}}
        ]))
        .unwrap();

        let row = convert_row(&cells, &fields);
        assert_eq!(row["tags"], json!(["a", "b"]));
        assert_eq!(row["geo"], json!({"city": "Berlin"}));
    }
}
