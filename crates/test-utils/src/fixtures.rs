//! Stations shared by the generated soundings.

/// Station ids and the registry that knows them.
pub mod stations {
    /// Vienna Hohe Warte, WMO 11035
    pub const VIENNA: &str = "11035";

    /// Oakland, WMO 72493
    pub const OAKLAND: &str = "72493";

    /// A ship call sign, not in the registry
    pub const SHIP: &str = "DBBH";

    /// Station registry JSON covering [`VIENNA`] and [`OAKLAND`].
    pub const REGISTRY_JSON: &str = r#"{
        "11035": {"name": "Wien/Hohe Warte", "lat": 48.2486, "lon": 16.3564, "elevation": 200.0},
        "72493": {"name": "Oakland", "lat": 37.73, "lon": -122.21, "elevation": 3.0}
    }"#;
}
