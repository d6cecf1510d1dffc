use crate::AlertBatch;

/// Plain-text body of the daily signals mail
pub struct AlertFormatter;

impl AlertFormatter {
    /// First line: the flagged tickers, comma separated. Then one line per
    /// alert message. When a table is given it follows after a blank line.
    pub fn render(batch: &AlertBatch, table: Option<&[Vec<String>]>) -> String {
        let mut body = batch.flagged_tickers().join(", ");

        for message in batch.messages() {
            body.push('\n');
            body.push_str(message);
        }

        if let Some(table) = table.filter(|t| !t.is_empty()) {
            body.push_str("\n\n");
            body.push_str(&Self::render_table(table));
        }

        body
    }

    /// Left-aligned columns padded to the widest cell, two spaces apart.
    /// Trailing padding is trimmed from every line.
    pub fn render_table(table: &[Vec<String>]) -> String {
        let columns = table.iter().map(|row| row.len()).max().unwrap_or(0);
        let mut widths = vec![0usize; columns];
        for row in table {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        table
            .iter()
            .map(|row| {
                let line = row
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
                    .collect::<Vec<_>>()
                    .join("  ");
                line.trim_end().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{AlertCategory, AlertEvent};

    fn batch() -> AlertBatch {
        AlertBatch::new(vec![
            AlertEvent::new("MSFT", AlertCategory::Breakout, "MSFT: clean breakout"),
            AlertEvent::new("KO", AlertCategory::ExDividend, "KO: ex-dividend"),
            AlertEvent::new("MSFT", AlertCategory::RsiCross70, "MSFT: RSI crossed above 70"),
        ])
    }

    fn cells(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_render_tickers_then_messages() {
        let body = AlertFormatter::render(&batch(), None);
        assert_eq!(
            body,
            "MSFT, KO\nMSFT: clean breakout\nKO: ex-dividend\nMSFT: RSI crossed above 70"
        );
    }

    #[test]
    fn test_render_appends_table_after_blank_line() {
        let table = cells(&[&["Ticker", "RSI"], &["KO", "28.5"]]);
        let body = AlertFormatter::render(&batch(), Some(&table));

        let (head, tail) = body.split_once("\n\n").unwrap();
        assert_eq!(head.lines().count(), 4);
        assert_eq!(tail, "Ticker  RSI\nKO      28.5");
    }

    #[test]
    fn test_render_empty_batch() {
        assert_eq!(AlertFormatter::render(&AlertBatch::default(), None), "");
    }

    #[test]
    fn test_render_table_aligns_columns() {
        let table = cells(&[&["A", "Close", "Stage"], &["LONGER", "1.5", "2"]]);
        let rendered = AlertFormatter::render_table(&table);

        assert_eq!(rendered, "A       Close  Stage\nLONGER  1.5    2");
    }
}
