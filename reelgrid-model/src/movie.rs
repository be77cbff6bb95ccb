use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ModelError, Result};

const TOTAL_FIELDS_IN_CSV_LINE: usize = 24;

const BUDGET_COLUMN: usize = 2;
const GENRES_COLUMN: usize = 3;
const ID_COLUMN: usize = 5;
const OVERVIEW_COLUMN: usize = 9;
const PRODUCTION_COUNTRIES_COLUMN: usize = 13;
const RELEASE_DATE_COLUMN: usize = 14;
const REVENUE_COLUMN: usize = 15;
const TITLE_COLUMN: usize = 20;

/// `genres`, `production_countries` and `cast` columns embed a list of
/// `{'name': '...'}` dicts; only the names matter downstream.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'name'\s*:\s*'((?:[^'\\]|\\.)*)'"#).expect("valid regex"));

/// Extract the `name` values out of an embedded list column. An empty
/// column is an empty list; a column without any names yields nothing.
pub(crate) fn embedded_names(column: &str) -> Vec<String> {
    NAME_RE
        .captures_iter(column)
        .map(|c| c[1].replace("\\'", "'").replace("\\\"", "\""))
        .collect()
}

pub(crate) fn parse_decimal_int(raw: &str, what: &str) -> Result<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ModelError::InvalidLine(format!("invalid {what}: {raw}")));
    }
    raw.parse()
        .map_err(|_| ModelError::InvalidLine(format!("invalid {what}: {raw}")))
}

pub(crate) fn parse_decimal_float(raw: &str, what: &str) -> Result<f64> {
    let digits = raw.replacen('.', "", 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ModelError::InvalidLine(format!("invalid {what}: {raw}")));
    }
    raw.parse()
        .map_err(|_| ModelError::InvalidLine(format!("invalid {what}: {raw}")))
}

pub(crate) fn split_csv_fields(line: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record.iter().map(str::to_string).collect()),
        Ok(false) => Err(ModelError::InvalidLine("empty line".to_string())),
        Err(e) => Err(ModelError::InvalidLine(format!("malformed csv: {e}"))),
    }
}

/// One movie record. Any subset of fields may be present: filter stages
/// project columns away, and the field-tagged batch codec only carries
/// what every item in the batch has.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Movie {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub genres: Option<Vec<String>>,
    pub production_countries: Option<Vec<String>>,
    pub release_date: Option<NaiveDate>,
    pub budget: Option<i64>,
    pub overview: Option<String>,
    pub revenue: Option<f64>,
}

impl Movie {
    pub fn from_csv_line(line: &str) -> Result<Self> {
        let fields = split_csv_fields(line)?;
        if fields.len() != TOTAL_FIELDS_IN_CSV_LINE {
            return Err(ModelError::InvalidLine(format!(
                "invalid amount of line fields: {}",
                fields.len()
            )));
        }

        let budget = parse_decimal_int(&fields[BUDGET_COLUMN], "budget")?;
        let genres = embedded_names(&fields[GENRES_COLUMN]);
        let id = parse_decimal_int(&fields[ID_COLUMN], "id")?;
        let overview = fields[OVERVIEW_COLUMN].clone();
        let production_countries = embedded_names(&fields[PRODUCTION_COUNTRIES_COLUMN]);
        let release_date = NaiveDate::parse_from_str(&fields[RELEASE_DATE_COLUMN], "%Y-%m-%d")
            .map_err(|_| {
                ModelError::InvalidLine(format!(
                    "invalid release date: {}",
                    fields[RELEASE_DATE_COLUMN]
                ))
            })?;
        let revenue = parse_decimal_float(&fields[REVENUE_COLUMN], "revenue")?;
        let title = fields[TITLE_COLUMN].clone();

        Ok(Movie {
            id: Some(id),
            title: Some(title),
            genres: Some(genres),
            production_countries: Some(production_countries),
            release_date: Some(release_date),
            budget: Some(budget),
            overview: Some(overview),
            revenue: Some(revenue),
        })
    }

    pub fn release_year(&self) -> Option<i32> {
        self.release_date.map(|d| d.year())
    }

    /// Result-row rendering: the present fields in declaration order,
    /// comma-joined; lists rendered `["A", "B"]`.
    pub fn to_csv_line(&self) -> String {
        let mut out: Vec<String> = Vec::new();
        if let Some(id) = self.id {
            out.push(id.to_string());
        }
        if let Some(title) = &self.title {
            out.push(title.clone());
        }
        if let Some(genres) = &self.genres {
            out.push(format!("{genres:?}"));
        }
        if let Some(countries) = &self.production_countries {
            out.push(format!("{countries:?}"));
        }
        if let Some(date) = self.release_date {
            out.push(date.to_string());
        }
        if let Some(budget) = self.budget {
            out.push(budget.to_string());
        }
        if let Some(overview) = &self.overview {
            out.push(overview.clone());
        }
        if let Some(revenue) = self.revenue {
            out.push(revenue.to_string());
        }
        out.join(",")
    }
}

/// Field tags of the field-tagged `MoviesBatch` serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MovieField {
    Id = 1,
    Title = 2,
    Genres = 3,
    ProductionCountries = 4,
    ReleaseDate = 5,
    Budget = 6,
    Overview = 7,
    Revenue = 8,
}

impl MovieField {
    pub const ALL: [MovieField; 8] = [
        MovieField::Id,
        MovieField::Title,
        MovieField::Genres,
        MovieField::ProductionCountries,
        MovieField::ReleaseDate,
        MovieField::Budget,
        MovieField::Overview,
        MovieField::Revenue,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    /// Configuration name (`OUTPUT_FIELDS_SUBSET` entries).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "id" => Some(MovieField::Id),
            "title" => Some(MovieField::Title),
            "genres" => Some(MovieField::Genres),
            "production_countries" => Some(MovieField::ProductionCountries),
            "release_date" => Some(MovieField::ReleaseDate),
            "budget" => Some(MovieField::Budget),
            "overview" => Some(MovieField::Overview),
            "revenue" => Some(MovieField::Revenue),
            _ => None,
        }
    }

    pub fn is_present(self, movie: &Movie) -> bool {
        match self {
            MovieField::Id => movie.id.is_some(),
            MovieField::Title => movie.title.is_some(),
            MovieField::Genres => movie.genres.is_some(),
            MovieField::ProductionCountries => movie.production_countries.is_some(),
            MovieField::ReleaseDate => movie.release_date.is_some(),
            MovieField::Budget => movie.budget.is_some(),
            MovieField::Overview => movie.overview.is_some(),
            MovieField::Revenue => movie.revenue.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_line() -> String {
        let mut fields = vec![String::new(); TOTAL_FIELDS_IN_CSV_LINE];
        fields[BUDGET_COLUMN] = "15000000".to_string();
        fields[GENRES_COLUMN] = "\"[{'id': 18, 'name': 'Drama'}]\"".to_string();
        fields[ID_COLUMN] = "475557".to_string();
        fields[OVERVIEW_COLUMN] = "A moving story".to_string();
        fields[PRODUCTION_COUNTRIES_COLUMN] =
            "\"[{'iso_3166_1': 'AR', 'name': 'Argentina'}, {'iso_3166_1': 'ES', 'name': 'Spain'}]\""
                .to_string();
        fields[RELEASE_DATE_COLUMN] = "2005-06-01".to_string();
        fields[REVENUE_COLUMN] = "1074251311.0".to_string();
        fields[TITLE_COLUMN] = "El secreto".to_string();
        fields.join(",")
    }

    #[test]
    fn parses_the_relevant_columns() {
        let movie = Movie::from_csv_line(&sample_line()).unwrap();
        assert_eq!(movie.id, Some(475557));
        assert_eq!(movie.title.as_deref(), Some("El secreto"));
        assert_eq!(movie.genres.as_deref(), Some(&["Drama".to_string()][..]));
        assert_eq!(
            movie.production_countries,
            Some(vec!["Argentina".to_string(), "Spain".to_string()])
        );
        assert_eq!(movie.release_year(), Some(2005));
        assert_eq!(movie.budget, Some(15_000_000));
        assert_eq!(movie.revenue, Some(1_074_251_311.0));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(
            Movie::from_csv_line("a,b,c"),
            Err(ModelError::InvalidLine(_))
        ));
    }

    #[test]
    fn rejects_non_decimal_budget() {
        let line = sample_line().replacen("15000000", "not-a-number", 1);
        assert!(Movie::from_csv_line(&line).is_err());
    }

    #[test]
    fn rejects_bad_release_date() {
        let line = sample_line().replacen("2005-06-01", "June 2005", 1);
        assert!(Movie::from_csv_line(&line).is_err());
    }

    #[test]
    fn empty_embedded_list_is_empty() {
        assert!(embedded_names("").is_empty());
        assert!(embedded_names("[]").is_empty());
    }

    #[test]
    fn embedded_names_unescape_quotes() {
        let names = embedded_names(r"[{'name': 'O\'Brien'}]");
        assert_eq!(names, vec!["O'Brien".to_string()]);
    }

    #[test]
    fn csv_line_renders_present_fields_only() {
        let movie = Movie {
            id: Some(1),
            title: Some("A".to_string()),
            genres: Some(vec!["Drama".to_string()]),
            ..Movie::default()
        };
        assert_eq!(movie.to_csv_line(), "1,A,[\"Drama\"]");
    }
}
