//! Row types for the three dataset entities and for analytic query results.

use serde::Serialize;

/// One airport, in source column order.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Airport {
    pub id: i32,
    pub name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    /// Hours offset from UTC
    pub timezone: Option<f64>,
    pub dst: Option<String>,
    /// IANA timezone name
    pub tz: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub airport_type: Option<String>,
    pub source: Option<String>,
}

/// One airline, in source column order.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Airline {
    pub id: i32,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub callsign: Option<String>,
    pub country: Option<String>,
    pub active: Option<String>,
}

/// One route. `id` is the 1-based row number in the routes file; the
/// airport and airline references are not checked against their tables.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Route {
    pub id: i32,
    pub airline: Option<String>,
    pub airline_id: Option<i32>,
    pub src_airport: Option<String>,
    pub src_airport_id: Option<i32>,
    pub dst_airport: Option<String>,
    pub dst_airport_id: Option<i32>,
    pub codeshare: Option<String>,
    pub stops: Option<i32>,
    pub equipment: Option<String>,
}

/// An airport ranked by how many routes touch it.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TopAirport {
    pub iata: Option<String>,
    pub name: Option<String>,
    pub route_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RouteBetween {
    pub id: i32,
    pub src_iata: Option<String>,
    pub dst_iata: Option<String>,
    pub stops: Option<i32>,
    pub equipment: Option<String>,
}

/// An airport with its great-circle distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct NearbyAirport {
    pub id: i32,
    pub iata: Option<String>,
    pub name: Option<String>,
    pub distance_km: f64,
}
