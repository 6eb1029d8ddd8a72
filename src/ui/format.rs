use serenity::model::mention::Mentionable;

use crate::audio::record::QueueRecord;

/// Formatea segundos como `m:ss`
pub fn format_time(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Línea de la cola:
/// "[Track Name](locator) | `[format][0:50 / 1:20, 62%][Requested by: @user]`"
pub fn record_line(record: &QueueRecord, elapsed_seconds: Option<f64>) -> String {
    let elapsed = elapsed_seconds.unwrap_or(0.0).max(0.0) as u64;
    let mut time_status = format_time(elapsed);

    if record.duration_seconds > 0 {
        let percentage = elapsed * 100 / record.duration_seconds;
        time_status.push_str(&format!(
            " / {}, {}%",
            format_time(record.duration_seconds),
            percentage
        ));
    }

    format!(
        "[{}]({}) | `[{}][{}][Requested by: {}]`",
        record.title,
        record.locator,
        record.encoding_hint,
        time_status,
        record.owner_id.mention()
    )
}

/// Agrupa líneas en mensajes de como máximo `limit` caracteres.
///
/// Las líneas más largas que el límite se parten por caracteres.
pub fn chunk_lines<I, S>(lines: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        for piece in split_long_line(line.as_ref(), limit) {
            // +1 por el salto de línea que une las piezas
            let needed = piece.chars().count() + usize::from(!current.is_empty());

            if !current.is_empty() && current.chars().count() + needed > limit {
                chunks.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn split_long_line(line: &str, limit: usize) -> Vec<String> {
    if line.chars().count() <= limit {
        return vec![line.to_string()];
    }

    line.chars()
        .collect::<Vec<_>>()
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
