/// Channel, coil and coordinate-frame constants
/// Values follow the Neuromag/MNE numbering so channel descriptors exported
/// from MNE-Python can be used without translation.

// Coordinate frames (FIFFV_COORD_*)
pub const FIFFV_COORD_UNKNOWN: i32 = 0; // Unknown coordinate frame
pub const FIFFV_COORD_DEVICE: i32 = 1; // Device coordinates (MEG sensor array)
pub const FIFFV_COORD_ISOTRAK: i32 = 2; // Isotrak digitizer coordinates
pub const FIFFV_COORD_HPI: i32 = 3; // HPI coil coordinates
pub const FIFFV_COORD_HEAD: i32 = 4; // Head coordinates (fiducial-based)
pub const FIFFV_COORD_MRI: i32 = 5; // MRI coordinates

// Channel types (FIFFV_*_CH)
pub const FIFFV_MEG_CH: i32 = 1; // MEG channel (magnetometer or gradiometer)
pub const FIFFV_REF_MEG_CH: i32 = 301; // MEG reference channel
pub const FIFFV_EEG_CH: i32 = 2; // EEG channel
pub const FIFFV_STIM_CH: i32 = 3; // Stimulus channel
pub const FIFFV_EOG_CH: i32 = 202; // EOG channel
pub const FIFFV_ECG_CH: i32 = 402; // ECG channel
pub const FIFFV_MISC_CH: i32 = 502; // Miscellaneous channel

// Coil types (FIFFV_COIL_*)
pub const FIFFV_COIL_NONE: i32 = 0;
pub const FIFFV_COIL_POINT_MAGNETOMETER: i32 = 2000;
pub const FIFFV_COIL_VV_PLANAR_T1: i32 = 3012;
pub const FIFFV_COIL_VV_PLANAR_T2: i32 = 3013;
pub const FIFFV_COIL_VV_PLANAR_T3: i32 = 3014;
pub const FIFFV_COIL_VV_MAG_T1: i32 = 3022;
pub const FIFFV_COIL_VV_MAG_T2: i32 = 3023;
pub const FIFFV_COIL_VV_MAG_T3: i32 = 3024;

/// μ0 / 4π in T·m/A
pub const MU0_OVER_4PI: f64 = 1e-7;

/// Vectorview planar gradiometer baseline (m)
pub const VV_PLANAR_BASELINE: f64 = 0.0168;

/// Moment scale between A·m and nA·m
pub const NAM_PER_AM: f64 = 1e9;

/// Check if a channel type is a data channel (not stimulus, etc.)
pub fn is_data_channel(kind: i32) -> bool {
    matches!(
        kind,
        FIFFV_MEG_CH
            | FIFFV_REF_MEG_CH
            | FIFFV_EEG_CH
            | FIFFV_EOG_CH
            | FIFFV_ECG_CH
            | FIFFV_MISC_CH
    )
}

/// Get human-readable channel type name
pub fn channel_type_name(kind: i32) -> &'static str {
    match kind {
        FIFFV_MEG_CH => "MEG",
        FIFFV_REF_MEG_CH => "REF_MEG",
        FIFFV_EEG_CH => "EEG",
        FIFFV_STIM_CH => "STIM",
        FIFFV_EOG_CH => "EOG",
        FIFFV_ECG_CH => "ECG",
        FIFFV_MISC_CH => "MISC",
        _ => "UNKNOWN",
    }
}

/// Get human-readable coordinate frame name
pub fn coord_frame_name(frame: i32) -> &'static str {
    match frame {
        FIFFV_COORD_UNKNOWN => "Unknown",
        FIFFV_COORD_DEVICE => "Device",
        FIFFV_COORD_ISOTRAK => "Isotrak",
        FIFFV_COORD_HPI => "HPI",
        FIFFV_COORD_HEAD => "Head",
        FIFFV_COORD_MRI => "MRI",
        _ => "Unknown",
    }
}

/// Magnetometer coils measure T, gradiometers T/m
pub fn is_magnetometer_coil(coil_type: i32) -> bool {
    matches!(
        coil_type,
        FIFFV_COIL_POINT_MAGNETOMETER
            | FIFFV_COIL_VV_MAG_T1
            | FIFFV_COIL_VV_MAG_T2
            | FIFFV_COIL_VV_MAG_T3
    )
}

pub fn is_planar_gradiometer_coil(coil_type: i32) -> bool {
    matches!(
        coil_type,
        FIFFV_COIL_VV_PLANAR_T1 | FIFFV_COIL_VV_PLANAR_T2 | FIFFV_COIL_VV_PLANAR_T3
    )
}

/// Get human-readable coil type name
pub fn coil_type_name(coil_type: i32) -> &'static str {
    match coil_type {
        FIFFV_COIL_NONE => "None",
        FIFFV_COIL_POINT_MAGNETOMETER => "Point magnetometer",
        FIFFV_COIL_VV_PLANAR_T1 | FIFFV_COIL_VV_PLANAR_T2 | FIFFV_COIL_VV_PLANAR_T3 => {
            "Vectorview planar gradiometer"
        }
        FIFFV_COIL_VV_MAG_T1 | FIFFV_COIL_VV_MAG_T2 | FIFFV_COIL_VV_MAG_T3 => {
            "Vectorview magnetometer"
        }
        _ => "Unsupported",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_data_channel() {
        // Data channels
        assert!(is_data_channel(FIFFV_MEG_CH));
        assert!(is_data_channel(FIFFV_REF_MEG_CH));
        assert!(is_data_channel(FIFFV_EEG_CH));
        assert!(is_data_channel(FIFFV_EOG_CH));
        assert!(is_data_channel(FIFFV_ECG_CH));
        assert!(is_data_channel(FIFFV_MISC_CH));

        // Non-data channels
        assert!(!is_data_channel(FIFFV_STIM_CH));
        assert!(!is_data_channel(999)); // Unknown type
    }

    #[test]
    fn test_channel_type_name() {
        assert_eq!(channel_type_name(FIFFV_MEG_CH), "MEG");
        assert_eq!(channel_type_name(FIFFV_REF_MEG_CH), "REF_MEG");
        assert_eq!(channel_type_name(FIFFV_EEG_CH), "EEG");
        assert_eq!(channel_type_name(FIFFV_STIM_CH), "STIM");
        assert_eq!(channel_type_name(999), "UNKNOWN");
    }

    #[test]
    fn test_coord_frame_name() {
        assert_eq!(coord_frame_name(FIFFV_COORD_DEVICE), "Device");
        assert_eq!(coord_frame_name(FIFFV_COORD_HEAD), "Head");
        assert_eq!(coord_frame_name(FIFFV_COORD_MRI), "MRI");
        assert_eq!(coord_frame_name(999), "Unknown");
    }

    #[test]
    fn test_coil_classification() {
        assert!(is_magnetometer_coil(FIFFV_COIL_VV_MAG_T3));
        assert!(is_magnetometer_coil(FIFFV_COIL_POINT_MAGNETOMETER));
        assert!(!is_magnetometer_coil(FIFFV_COIL_VV_PLANAR_T1));

        assert!(is_planar_gradiometer_coil(FIFFV_COIL_VV_PLANAR_T1));
        assert!(!is_planar_gradiometer_coil(FIFFV_COIL_VV_MAG_T1));
        assert!(!is_planar_gradiometer_coil(FIFFV_COIL_NONE));

        assert_eq!(coil_type_name(FIFFV_COIL_VV_PLANAR_T2), "Vectorview planar gradiometer");
        assert_eq!(coil_type_name(FIFFV_COIL_VV_MAG_T2), "Vectorview magnetometer");
        assert_eq!(coil_type_name(1234), "Unsupported");
    }

    #[test]
    fn test_constant_values() {
        // Verify critical constants match MNE-Python values
        assert_eq!(FIFFV_MEG_CH, 1);
        assert_eq!(FIFFV_EEG_CH, 2);
        assert_eq!(FIFFV_STIM_CH, 3);

        assert_eq!(FIFFV_COORD_DEVICE, 1);
        assert_eq!(FIFFV_COORD_HEAD, 4);

        assert_eq!(FIFFV_COIL_VV_PLANAR_T1, 3012);
        assert_eq!(FIFFV_COIL_VV_MAG_T3, 3024);
    }
}
