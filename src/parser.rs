//! parser.rs
//!
//! Reads the three OpenFlights source files into typed rows.
//!
//! Each file is comma-separated with optional double-quote quoting, no header,
//! and a fixed column order. A field equal to the null token, or empty, becomes `None`.
//! Integer and float fields that do not parse also become `None`; a row with the
//! wrong number of columns, or without a usable primary key, aborts the read.

use std::collections::HashSet;
use std::fs::File;
use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use crate::errors::AppError;
use crate::models::{Airline, Airport, Route};

/// Null token used by the published OpenFlights files.
pub const DEFAULT_NULL_TOKEN: &str = "\\N";

/// Borrowed view of one source row with null-token aware accessors.
pub struct Fields<'a> {
    record: &'a StringRecord,
    null_token: &'a str,
}

impl<'a> Fields<'a> {
    pub fn new(record: &'a StringRecord, null_token: &'a str) -> Self {
        Fields { record, null_token }
    }

    fn raw(&self, idx: usize) -> Option<&'a str> {
        self.record
            .get(idx)
            .filter(|v| !v.is_empty() && *v != self.null_token)
    }

    /// Text exactly as it appears in the file.
    pub fn text(&self, idx: usize) -> Option<String> {
        self.raw(idx).map(str::to_string)
    }

    pub fn int(&self, idx: usize) -> Option<i32> {
        self.raw(idx).and_then(|v| v.trim().parse::<i32>().ok())
    }

    pub fn float(&self, idx: usize) -> Option<f64> {
        self.raw(idx)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// A primary key: unlike other integers, a missing value is an error.
    pub fn key(&self, idx: usize, column: &str) -> Result<i32, String> {
        match self.raw(idx) {
            None => Err(format!("{} is null", column)),
            Some(v) => v
                .trim()
                .parse::<i32>()
                .map_err(|_| format!("{} '{}' is not an integer", column, v)),
        }
    }
}

/// A row type that can be built from one line of its source file.
pub trait SourceRecord: Sized {
    /// Exact number of columns a row must have.
    const COLUMNS: usize;

    /// `ordinal` is the 1-based position of the row among the file's records.
    fn from_fields(fields: &Fields<'_>, ordinal: usize) -> Result<Self, String>;
}

impl SourceRecord for Airport {
    const COLUMNS: usize = 14;

    fn from_fields(f: &Fields<'_>, _ordinal: usize) -> Result<Self, String> {
        Ok(Airport {
            id: f.key(0, "id")?,
            name: f.text(1),
            city: f.text(2),
            country: f.text(3),
            iata: f.text(4),
            icao: f.text(5),
            latitude: f.float(6),
            longitude: f.float(7),
            altitude: f.int(8),
            timezone: f.float(9),
            dst: f.text(10),
            tz: f.text(11),
            airport_type: f.text(12),
            source: f.text(13),
        })
    }
}

impl SourceRecord for Airline {
    const COLUMNS: usize = 8;

    fn from_fields(f: &Fields<'_>, _ordinal: usize) -> Result<Self, String> {
        Ok(Airline {
            id: f.key(0, "id")?,
            name: f.text(1),
            alias: f.text(2),
            iata: f.text(3),
            icao: f.text(4),
            callsign: f.text(5),
            country: f.text(6),
            active: f.text(7),
        })
    }
}

impl SourceRecord for Route {
    const COLUMNS: usize = 9;

    fn from_fields(f: &Fields<'_>, ordinal: usize) -> Result<Self, String> {
        let id = i32::try_from(ordinal)
            .map_err(|_| format!("route number {} exceeds the id range", ordinal))?;
        Ok(Route {
            id,
            airline: f.text(0),
            airline_id: f.int(1),
            src_airport: f.text(2),
            src_airport_id: f.int(3),
            dst_airport: f.text(4),
            dst_airport_id: f.int(5),
            codeshare: f.text(6),
            stops: f.int(7),
            equipment: f.text(8),
        })
    }
}

/// Read every row of `path` as `T`, failing on the first malformed row.
pub fn read_records<T: SourceRecord>(path: &Path, null_token: &str) -> Result<Vec<T>, AppError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => AppError::SourceMissing(path.to_path_buf()),
        _ => AppError::SourceRead {
            path: path.to_path_buf(),
            source: csv::Error::from(e),
        },
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|source| AppError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(idx as u64 + 1, |p| p.line());
        let malformed = |reason: String| AppError::MalformedRow {
            path: path.to_path_buf(),
            line,
            reason,
        };

        if record.len() != T::COLUMNS {
            return Err(malformed(format!(
                "expected {} columns, found {}",
                T::COLUMNS,
                record.len()
            )));
        }

        let fields = Fields::new(&record, null_token);
        rows.push(T::from_fields(&fields, idx + 1).map_err(malformed)?);
    }

    debug!(path = %path.display(), rows = rows.len(), "Parsed source file");
    Ok(rows)
}

/// Keep the first row for each key, in file order. Returns the surviving
/// rows and how many were dropped.
pub fn dedup_first<T, K, F>(rows: Vec<T>, key: F) -> (Vec<T>, usize)
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let before = rows.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<T> = rows.into_iter().filter(|r| seen.insert(key(r))).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Locations of the three source files.
#[derive(Debug, Clone)]
pub struct SourcePaths {
    pub airports: PathBuf,
    pub airlines: PathBuf,
    pub routes: PathBuf,
}

impl SourcePaths {
    pub fn in_dir(dir: &Path, airports: &str, airlines: &str, routes: &str) -> Self {
        SourcePaths {
            airports: dir.join(airports),
            airlines: dir.join(airlines),
            routes: dir.join(routes),
        }
    }
}

/// A fully parsed and deduplicated snapshot, ready to replace the store.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub airports: Vec<Airport>,
    pub airlines: Vec<Airline>,
    pub routes: Vec<Route>,
    pub airports_dropped: usize,
    pub airlines_dropped: usize,
}

/// Parse all three files. Nothing is returned unless every file is valid.
pub fn read_dataset(paths: &SourcePaths, null_token: &str) -> Result<Dataset, AppError> {
    let (airports, airports_dropped) =
        dedup_first(read_records::<Airport>(&paths.airports, null_token)?, |a| a.id);
    let (airlines, airlines_dropped) =
        dedup_first(read_records::<Airline>(&paths.airlines, null_token)?, |a| a.id);
    let routes = read_records::<Route>(&paths.routes, null_token)?;

    Ok(Dataset {
        airports,
        airlines,
        routes,
        airports_dropped,
        airlines_dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    const GOROKA: &str = r#"1,"Goroka Airport","Goroka","Papua New Guinea","GKA","AYGA",-6.081689834590001,145.391998291,5282,10,"U","Pacific/Port_Moresby","airport","OurAirports""#;

    #[test]
    fn airport_row_keeps_text_and_full_precision() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "airports.dat", &format!("{}\n", GOROKA));

        let rows = assert_ok!(read_records::<Airport>(&path, DEFAULT_NULL_TOKEN));
        assert_eq!(rows.len(), 1);
        let a = &rows[0];
        assert_eq!(a.id, 1);
        assert_eq!(a.name.as_deref(), Some("Goroka Airport"));
        assert_eq!(a.iata.as_deref(), Some("GKA"));
        assert_eq!(a.latitude, Some(-6.081689834590001));
        assert_eq!(a.longitude, Some(145.391998291));
        assert_eq!(a.altitude, Some(5282));
        assert_eq!(a.timezone, Some(10.0));
        assert_eq!(a.airport_type.as_deref(), Some("airport"));
    }

    #[test]
    fn null_token_becomes_none_in_any_column() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "airports.dat",
            "7,\"Nowhere\",\\N,\"Land\",\\N,\\N,\\N,\\N,\\N,\\N,\\N,\\N,\\N,\\N\n",
        );

        let rows = assert_ok!(read_records::<Airport>(&path, DEFAULT_NULL_TOKEN));
        let a = &rows[0];
        assert_eq!(a.city, None);
        assert_eq!(a.iata, None);
        assert_eq!(a.latitude, None);
        assert_eq!(a.altitude, None);
        assert_eq!(a.source, None);
    }

    #[test]
    fn custom_null_token_is_honoured() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "airlines.dat", "5,NULL,NULL,NULL,NULL,NULL,NULL,Y\n");

        let rows = assert_ok!(read_records::<Airline>(&path, "NULL"));
        assert_eq!(rows[0].name, None);
        assert_eq!(rows[0].active.as_deref(), Some("Y"));
    }

    #[test]
    fn quoted_commas_stay_in_one_field() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "airlines.dat",
            "324,\"All Nippon Airways\",\"ANA All Nippon Airways\",\"NH\",\"ANA\",\"ALL NIPPON\",\"Japan, Tokyo\",\"Y\"\n",
        );

        let rows = assert_ok!(read_records::<Airline>(&path, DEFAULT_NULL_TOKEN));
        assert_eq!(rows[0].country.as_deref(), Some("Japan, Tokyo"));
    }

    #[test]
    fn unparseable_integers_and_empty_fields_become_none() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "routes.dat", "2B,410,AER,2965,KZN,2990,,zero,CR2\n");

        let rows = assert_ok!(read_records::<Route>(&path, DEFAULT_NULL_TOKEN));
        assert_eq!(rows[0].stops, None);
        assert_eq!(rows[0].airline_id, Some(410));
        assert_eq!(rows[0].codeshare, None);
    }

    #[test]
    fn routes_are_numbered_in_file_order_and_duplicates_kept() {
        let dir = TempDir::new().unwrap();
        let line = "2B,410,AER,2965,KZN,2990,,0,CR2\n";
        let path = write(&dir, "routes.dat", &line.repeat(3));

        let rows = assert_ok!(read_records::<Route>(&path, DEFAULT_NULL_TOKEN));
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rows[0].src_airport_id, rows[2].src_airport_id);
    }

    #[test]
    fn wrong_column_count_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "routes.dat",
            "2B,410,AER,2965,KZN,2990,,0,CR2\n2B,410,AER,2965\n",
        );

        let err = assert_err!(read_records::<Route>(&path, DEFAULT_NULL_TOKEN));
        match err {
            AppError::MalformedRow { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("expected 9 columns, found 4"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn null_primary_key_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "airlines.dat", "\\N,\"X\",\\N,\\N,\\N,\\N,\\N,\"N\"\n");

        let err = assert_err!(read_records::<Airline>(&path, DEFAULT_NULL_TOKEN));
        assert!(matches!(err, AppError::MalformedRow { line: 1, .. }));
    }

    #[test]
    fn missing_file_is_reported_as_such() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("airports.dat");

        let err = assert_err!(read_records::<Airport>(&path, DEFAULT_NULL_TOKEN));
        assert!(matches!(err, AppError::SourceMissing(p) if p == path));
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let rows = vec![(1, "first"), (2, "only"), (1, "second"), (1, "third")];
        let (kept, dropped) = dedup_first(rows, |r| r.0);

        assert_eq!(kept, vec![(1, "first"), (2, "only")]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn dataset_dedups_keyed_entities_only() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "airports.dat",
            &format!("{}\n{}\n", GOROKA, GOROKA.replace("Goroka Airport", "Shadow")),
        );
        write(
            &dir,
            "airlines.dat",
            "1,\"A\",\\N,\\N,\\N,\\N,\\N,\"Y\"\n1,\"B\",\\N,\\N,\\N,\\N,\\N,\"Y\"\n",
        );
        write(&dir, "routes.dat", &"2B,410,GKA,1,GKA,1,,0,CR2\n".repeat(2));

        let paths = SourcePaths::in_dir(dir.path(), "airports.dat", "airlines.dat", "routes.dat");
        let ds = assert_ok!(read_dataset(&paths, DEFAULT_NULL_TOKEN));

        assert_eq!(ds.airports.len(), 1);
        assert_eq!(ds.airports[0].name.as_deref(), Some("Goroka Airport"));
        assert_eq!(ds.airports_dropped, 1);
        assert_eq!(ds.airlines[0].name.as_deref(), Some("A"));
        assert_eq!(ds.airlines_dropped, 1);
        assert_eq!(ds.routes.len(), 2);
    }
}
