use colored::*;

pub fn print_step(msg: &str) {
    println!("{} {}", "[ℹ]".cyan().bold(), msg.cyan());
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[✔]".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "[⚠]".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[x]".red().bold(), msg.red());
}

/// Print rows as a left-aligned table with a bold header
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let widths = column_widths(headers, rows);

    let header = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:<width$}", h, width = *w))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header.bold());
    println!("{}", "─".repeat(header.chars().count()).dimmed());

    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line);
    }
}

fn column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect()
}
