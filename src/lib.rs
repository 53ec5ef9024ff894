use axum::{
    extract::{Extension, Query},
    response::IntoResponse,
};
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MENU_PDF_URL: &str =
    "https://westtown.myschoolapp.com/ftpimages/1579/download/download_3631449.pdf?_=1758060252872";

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

const WEEKDAY_HEADER: [&str; 5] = ["monday", "tuesday", "wednesday", "thursday", "friday"];

#[derive(Deserialize)]
pub struct MenuQuery {
    pub date: Option<String>,
    pub action: Option<String>,
}

#[derive(Serialize)]
pub struct MenuResponse {
    pub date: String,
    pub weekday: String,
    pub shortday: String,
    pub date_str: String,
    pub menu: MenuSections,
}

/// The six sections shown by the display client. Every response carries all
/// six keys; "no data" is an empty list, never a missing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MenuSections {
    pub breakfast: Vec<String>,
    pub snack: Vec<String>,
    pub lunch: Vec<String>,
    pub salad: Vec<String>,
    pub diy: Vec<String>,
    pub dinner: Vec<String>,
}

impl MenuSections {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error)]
pub enum MenuError {
    #[error("menu download failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("menu table extraction failed: {0}")]
    Extract(#[from] pdf_extract::OutputError),
}

pub async fn get_menu(
    Query(params): Query<MenuQuery>,
    Extension(client): Extension<Client>,
) -> impl IntoResponse {
    let today = Local::now().date_naive();
    let mut selected = resolve_selected_date(params.date.as_deref(), today);
    if let Some(action) = params.action.as_deref().and_then(NavAction::parse) {
        selected = step_selected_date(selected, action, today);
    }

    let menu = menu_for_date(&client, selected, today).await;
    let (weekday, shortday, date_str) = header_labels(selected);

    axum::Json(MenuResponse {
        date: format_date(selected),
        weekday,
        shortday,
        date_str,
        menu,
    })
}

pub fn build_client() -> anyhow::Result<Client> {
    let client = Client::builder()
        // Avoid macOS system proxy lookup that can panic in sandboxed contexts.
        .no_proxy()
        .user_agent("westtown-dining-api/0.1")
        .timeout(FETCH_TIMEOUT)
        .build()?;
    Ok(client)
}

pub fn menu_pdf_url() -> String {
    std::env::var("MENU_PDF_URL").unwrap_or_else(|_| DEFAULT_MENU_PDF_URL.to_string())
}

pub async fn fetch_menu_pdf(client: &Client, url: &str) -> Result<Vec<u8>, MenuError> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    Ok(bytes.to_vec())
}

pub fn extract_menu_table(bytes: &[u8]) -> Result<Vec<Vec<String>>, MenuError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)?;
    Ok(table_from_pages(&pages))
}

/// One table-detection pass per page; pages without a weekday header
/// contribute nothing. Rows accumulate in document order.
pub fn table_from_pages(pages: &[String]) -> Vec<Vec<String>> {
    let mut table = Vec::new();
    for page in pages {
        table.extend(detect_table(page));
    }
    table
}

pub fn detect_table(page: &str) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut column_starts: Option<Vec<usize>> = None;

    for line in page.lines() {
        match &column_starts {
            None => {
                if let Some(starts) = weekday_column_starts(line) {
                    rows.push(slice_cells(line, &starts));
                    column_starts = Some(starts);
                }
            }
            Some(starts) => {
                if line.trim().is_empty() {
                    continue;
                }
                let cells = slice_cells(line, starts);
                // An empty label cell means the line continues the row
                // above; its text joins the open cells as extra lines.
                if cells[0].is_empty() && rows.len() > 1 {
                    merge_continuation(rows.last_mut().unwrap(), &cells);
                } else {
                    rows.push(cells);
                }
            }
        }
    }

    rows
}

/// Finds the header line naming Monday..Friday in order and returns the
/// column start offsets, with 0 prepended for the label column.
fn weekday_column_starts(line: &str) -> Option<Vec<usize>> {
    let re = Regex::new(r"(?i)monday|tuesday|wednesday|thursday|friday").ok()?;
    let matches: Vec<_> = re.find_iter(line).collect();
    if matches.len() != WEEKDAY_HEADER.len() {
        return None;
    }
    for (found, day) in matches.iter().zip(WEEKDAY_HEADER) {
        if !found.as_str().eq_ignore_ascii_case(day) {
            return None;
        }
    }
    if matches[0].start() == 0 {
        // No room for a label column left of Monday.
        return None;
    }

    let mut starts = vec![0];
    starts.extend(matches.iter().map(|m| m.start()));
    Some(starts)
}

fn slice_cells(line: &str, column_starts: &[usize]) -> Vec<String> {
    let mut cells = Vec::with_capacity(column_starts.len());
    for (i, &start) in column_starts.iter().enumerate() {
        let end = column_starts.get(i + 1).copied().unwrap_or(line.len());
        cells.push(slice_at(line, start, end).trim().to_string());
    }
    cells
}

// Offsets come from byte positions in the header line; a data line may put
// a multi-byte character across one, so snap to char boundaries.
fn slice_at(line: &str, start: usize, end: usize) -> &str {
    let mut start = start.min(line.len());
    while start < line.len() && !line.is_char_boundary(start) {
        start += 1;
    }
    let mut end = end.min(line.len());
    while end > start && !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[start..end]
}

fn merge_continuation(row: &mut [String], cells: &[String]) {
    for (cell, extra) in row.iter_mut().zip(cells) {
        if extra.is_empty() {
            continue;
        }
        if !cell.is_empty() {
            cell.push('\n');
        }
        cell.push_str(extra);
    }
}

pub fn current_week_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = today - chrono::Duration::days(today.weekday().num_days_from_monday() as i64);
    let sunday = monday + chrono::Duration::days(6);
    (monday, sunday)
}

pub fn in_current_week(date: NaiveDate, today: NaiveDate) -> bool {
    let (monday, sunday) = current_week_bounds(today);
    monday <= date && date <= sunday
}

/// Maps a date onto the extracted table. Pure: same inputs, same output.
/// Everything that can go wrong reads back as empty sections.
pub fn sections_for_date(table: &[Vec<String>], date: NaiveDate, today: NaiveDate) -> MenuSections {
    // Only the current week's dates are ever shown.
    if !in_current_week(date, today) {
        return MenuSections::empty();
    }

    // Source columns: 0 = section labels, 1..=5 = Monday..Friday. Saturday
    // and Sunday land past the last column and read back as empty cells.
    let pdf_col = date.weekday().num_days_from_monday() as usize + 1;

    if table.is_empty() {
        return MenuSections::empty();
    }

    // Vertical slice for this column, skipping the header row at index 0.
    let day_cells: Vec<&str> = table[1..]
        .iter()
        .map(|row| row.get(pdf_col).map(String::as_str).unwrap_or(""))
        .collect();

    structure_sections(&day_cells)
}

// Row order in the source table: breakfast, snack, lunch, salad, dinner.
// diy has no source row and stays empty.
fn structure_sections(day_cells: &[&str]) -> MenuSections {
    let section = |idx: usize| {
        day_cells
            .get(idx)
            .map(|cell| parse_menu_text(cell))
            .unwrap_or_default()
    };

    MenuSections {
        breakfast: section(0),
        snack: section(1),
        lunch: section(2),
        salad: section(3),
        diy: Vec::new(),
        dinner: section(4),
    }
}

pub fn parse_menu_text(cell: &str) -> Vec<String> {
    cell.lines()
        .map(|line| line.trim_matches([' ', '-', '•']).to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Runs the whole pipeline for one request. Fetch and extract failures
/// keep their reason for the log and collapse to the empty menu here; the
/// display contract never sees an error.
pub async fn menu_for_date(client: &Client, date: NaiveDate, today: NaiveDate) -> MenuSections {
    if !in_current_week(date, today) {
        return MenuSections::empty();
    }

    let bytes = match fetch_menu_pdf(client, &menu_pdf_url()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("menu fetch failed: {err}");
            return MenuSections::empty();
        }
    };

    let table = match extract_menu_table(&bytes) {
        Ok(table) => table,
        Err(err) => {
            warn!("menu extraction failed: {err}");
            return MenuSections::empty();
        }
    };
    debug!(rows = table.len(), "extracted menu table");

    sections_for_date(&table, date, today)
}

pub fn header_labels(date: NaiveDate) -> (String, String, String) {
    let weekday = date.format("%A").to_string();
    let shortday = date.format("%a").to_string().to_uppercase();
    let date_str = date.format("%m/%d").to_string();
    (weekday, shortday, date_str)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    Back,
    Forward,
    Refresh,
}

impl NavAction {
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_lowercase().as_str() {
            "back" => Some(Self::Back),
            "forward" => Some(Self::Forward),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

/// Navigation is unconstrained day stepping; the week window is enforced
/// at display time, not here.
pub fn step_selected_date(selected: NaiveDate, action: NavAction, today: NaiveDate) -> NaiveDate {
    match action {
        NavAction::Back => selected - chrono::Duration::days(1),
        NavAction::Forward => selected + chrono::Duration::days(1),
        NavAction::Refresh => today,
    }
}

/// The stored selected date is whatever the client last persisted; a
/// missing or malformed value recovers to today.
pub fn resolve_selected_date(stored: Option<&str>, today: NaiveDate) -> NaiveDate {
    stored.and_then(parse_date_param).unwrap_or(today)
}

pub fn parse_date_param(input: &str) -> Option<NaiveDate> {
    let parts: Vec<_> = input
        .split(|c| c == '-' || c == '/')
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() != 3 {
        return None;
    }
    let year = parts[0].parse::<i32>().ok()?;
    let month = parts[1].parse::<u32>().ok()?;
    let day = parts[2].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn format_date(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}
