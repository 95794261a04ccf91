//! Decoded fixtures shared by unit tests.

use test_utils::{bufr_message_bytes, netcdf_file_bytes, BufrSoundingSpec, NetcdfStationSpec};

use crate::profile::{ArrayCodec, ArraySet, FieldCodec, FieldMap, JsonArrayCodec, JsonFieldCodec};
use crate::station::StationRegistry;

/// Vienna BUFR sounding with `levels` levels, decoded.
pub(crate) fn fm94_fields(levels: usize) -> FieldMap {
    let spec = BufrSoundingSpec {
        levels,
        ..Default::default()
    };
    JsonFieldCodec::default()
        .decode(&bufr_message_bytes(&spec))
        .unwrap()
}

/// Single-station Oakland netCDF file, decoded.
pub(crate) fn fm35_arrays() -> ArraySet {
    JsonArrayCodec
        .decode(&netcdf_file_bytes(&[NetcdfStationSpec::default()]))
        .unwrap()
}

pub(crate) fn registry() -> StationRegistry {
    StationRegistry::from_json_str(test_utils::stations::REGISTRY_JSON).unwrap()
}
