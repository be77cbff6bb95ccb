//! The socket payload for batched lines and result rows: one CSV record
//! with `;` as separator and `"` quoting.

use crate::error::{ModelError, Result};

pub const LINES_SEPARATOR: u8 = b';';

pub fn join_lines(fields: &[String]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(LINES_SEPARATOR)
        .from_writer(Vec::new());
    writer
        .write_record(fields)
        .map_err(|e| ModelError::Codec(format!("csv write: {e}")))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| ModelError::Codec(format!("csv flush: {e}")))?;
    let mut line =
        String::from_utf8(bytes).map_err(|e| ModelError::Codec(format!("csv utf-8: {e}")))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

pub fn split_lines(message: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(LINES_SEPARATOR)
        .flexible(true)
        .from_reader(message.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record.iter().map(str::to_string).collect()),
        Ok(false) => Ok(Vec::new()),
        Err(e) => Err(ModelError::Codec(format!("malformed lines message: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_round_trip() {
        let lines = vec![
            "1,A,[\"Drama\"]".to_string(),
            "2,B;with;separators".to_string(),
            "3,\"quoted\"".to_string(),
        ];
        let joined = join_lines(&lines).unwrap();
        assert_eq!(split_lines(&joined).unwrap(), lines);
    }

    #[test]
    fn plain_lines_are_not_quoted() {
        let joined = join_lines(&["1".to_string(), "EOF".to_string()]).unwrap();
        assert_eq!(joined, "1;EOF");
    }

    #[test]
    fn empty_message_yields_no_lines() {
        assert!(split_lines("").unwrap().is_empty());
    }
}
