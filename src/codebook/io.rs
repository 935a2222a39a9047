// Codebook persistence
//
// JSON is the on-disk source of truth; CSV is the spreadsheet interchange
// format with one row per code. Multi-value cells use "; " for short lists
// and newlines for definitions/examples. The "|||" example separator is
// written as ": " in spreadsheet form and restored on import.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::code::{Code, Codebook, EXAMPLE_SEPARATOR};

const CSV_HEADERS: [&str; 5] = ["Label", "Definitions", "Categories", "Examples", "Alternatives"];
const LIST_SEPARATOR: &str = "; ";

pub fn load_codebook(path: &Path) -> Result<Codebook> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read codebook: {}", path.display()))?;
    let book: Codebook = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse codebook: {}", path.display()))?;
    Ok(book)
}

pub fn save_codebook(book: &Codebook, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(book).context("Failed to serialize codebook")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write codebook: {}", path.display()))?;
    info!(path = %path.display(), codes = book.len(), "saved codebook");
    Ok(())
}

fn example_to_cell(example: &str) -> String {
    example.replacen(EXAMPLE_SEPARATOR, ": ", 1)
}

fn cell_to_example(cell: &str) -> String {
    match cell.split_once(": ") {
        Some((source, quote)) => format!("{source}{EXAMPLE_SEPARATOR}{quote}"),
        None => cell.to_string(),
    }
}

fn split_list(cell: &str, separator: &str) -> Vec<String> {
    cell.split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn export_csv(book: &Codebook, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create spreadsheet: {}", path.display()))?;
    writer.write_record(CSV_HEADERS)?;

    for code in book.codes() {
        let examples: Vec<String> = code.examples.iter().map(|e| example_to_cell(e)).collect();
        let definitions = code.definitions.join("\n");
        let categories = code.categories.join(LIST_SEPARATOR);
        let alternatives = code.alternatives.join(LIST_SEPARATOR);
        let examples = examples.join("\n");
        writer.write_record([
            code.label.as_str(),
            definitions.as_str(),
            categories.as_str(),
            examples.as_str(),
            alternatives.as_str(),
        ])?;
    }

    writer.flush()?;
    info!(path = %path.display(), codes = book.len(), "exported spreadsheet");
    Ok(())
}

pub fn import_csv(path: &Path) -> Result<Codebook> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open spreadsheet: {}", path.display()))?;

    let mut book = Codebook::new();
    for record in reader.records() {
        let record = record.context("Failed to read spreadsheet row")?;
        let label = record.get(0).unwrap_or("").trim();
        if label.is_empty() {
            continue;
        }
        let mut code = Code::new(label);
        code.definitions = split_list(record.get(1).unwrap_or(""), "\n");
        code.categories = split_list(record.get(2).unwrap_or(""), LIST_SEPARATOR);
        code.examples = split_list(record.get(3).unwrap_or(""), "\n")
            .iter()
            .map(|cell| cell_to_example(cell))
            .collect();
        code.alternatives = split_list(record.get(4).unwrap_or(""), LIST_SEPARATOR);
        book.insert(code);
    }
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_book() -> Codebook {
        let mut code = Code::new("greeting");
        code.definitions = vec!["Saying hello when joining".to_string()];
        code.categories = vec!["Social".to_string(), "Arrival".to_string()];
        code.examples = vec![
            "msg-1|||ada: hello everyone".to_string(),
            "msg-2|||bo: hi all".to_string(),
        ];
        code.alternatives = vec!["hello".to_string()];
        let mut book = Codebook::new();
        book.insert(code);
        book.insert(Code::new("farewell"));
        book
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codebook.json");
        let book = sample_book();

        save_codebook(&book, &path).unwrap();
        let loaded = load_codebook(&path).unwrap();
        assert_eq!(loaded, book);
    }

    #[test]
    fn test_csv_round_trip_restores_example_separator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codebook.csv");
        let book = sample_book();

        export_csv(&book, &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("msg-1: ada: hello everyone"));
        assert!(!raw.contains(EXAMPLE_SEPARATOR));

        let imported = import_csv(&path).unwrap();
        let greeting = imported.get("greeting").unwrap();
        assert_eq!(
            greeting.examples,
            vec![
                "msg-1|||ada: hello everyone".to_string(),
                "msg-2|||bo: hi all".to_string()
            ]
        );
        assert_eq!(greeting.categories.len(), 2);
        assert_eq!(greeting.alternatives, vec!["hello".to_string()]);
    }
}
