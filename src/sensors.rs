//! MEG sensor geometry: coils and their integration points in head coordinates.

use log::debug;

use crate::constants::*;
use crate::error::{DipoleError, Result};
use crate::{ChannelInfo, CoordTrans, Vec3};

/// One weighted point over which a coil's flux is summed
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationPoint {
    pub position: Vec3,
    pub normal: Vec3,
    pub weight: f64,
}

/// A single MEG sensor
#[derive(Debug, Clone)]
pub struct Coil {
    pub name: String,
    pub coil_type: i32,
    pub position: Vec3, // Coil origin (head coordinates)
    pub normal: Vec3,
    pub points: Vec<IntegrationPoint>,
}

impl Coil {
    /// Build a coil from a channel descriptor, mapping device to head coordinates
    pub fn from_channel(ch: &ChannelInfo, dev_head_t: &CoordTrans) -> Result<Self> {
        let position = dev_head_t.apply_point(&ch.position());
        let ex = dev_head_t.apply_vector(&ch.ex());
        let ez = dev_head_t.apply_vector(&ch.ez());

        let ez_norm = ez.norm();
        if !ez_norm.is_finite() || ez_norm < 1e-12 {
            return Err(DipoleError::DegenerateGeometry(format!(
                "Channel {} has no coil normal",
                ch.ch_name
            )));
        }
        let normal = ez / ez_norm;

        let points = if is_magnetometer_coil(ch.coil_type) {
            vec![IntegrationPoint {
                position,
                normal,
                weight: 1.0,
            }]
        } else if is_planar_gradiometer_coil(ch.coil_type) {
            // Gradient along ex, measured by two points ±baseline/2 apart
            let ex_norm = ex.norm();
            if !ex_norm.is_finite() || ex_norm < 1e-12 {
                return Err(DipoleError::DegenerateGeometry(format!(
                    "Gradiometer {} has no ex axis",
                    ch.ch_name
                )));
            }
            let half = 0.5 * VV_PLANAR_BASELINE * ex / ex_norm;
            let w = 1.0 / VV_PLANAR_BASELINE;
            vec![
                IntegrationPoint {
                    position: position + half,
                    normal,
                    weight: w,
                },
                IntegrationPoint {
                    position: position - half,
                    normal,
                    weight: -w,
                },
            ]
        } else {
            return Err(DipoleError::InvalidInput(format!(
                "Channel {}: unsupported coil type {} ({})",
                ch.ch_name,
                ch.coil_type,
                coil_type_name(ch.coil_type)
            )));
        };

        Ok(Coil {
            name: ch.ch_name.clone(),
            coil_type: ch.coil_type,
            position,
            normal,
            points,
        })
    }

    pub fn is_gradiometer(&self) -> bool {
        is_planar_gradiometer_coil(self.coil_type)
    }
}

/// The MEG channels used for fitting, in head coordinates
#[derive(Debug, Clone)]
pub struct SensorArray {
    coils: Vec<Coil>,
    channel_indices: Vec<usize>, // Row of each coil in the source channel list
}

impl SensorArray {
    pub fn new(coils: Vec<Coil>) -> Self {
        let channel_indices = (0..coils.len()).collect();
        SensorArray {
            coils,
            channel_indices,
        }
    }

    /// Pick the good MEG channels and build their coils
    pub fn from_channels(
        channels: &[ChannelInfo],
        dev_head_t: &CoordTrans,
        bads: &[String],
    ) -> Result<Self> {
        if !dev_head_t.is_device_to_head() {
            return Err(DipoleError::InvalidInput(format!(
                "Expected a Device -> Head transform, got {}",
                dev_head_t.description()
            )));
        }
        dev_head_t.validate()?;

        let mut coils = Vec::new();
        let mut channel_indices = Vec::new();
        for (idx, ch) in channels.iter().enumerate() {
            if !ch.is_meg() || bads.iter().any(|b| b == &ch.ch_name) {
                continue;
            }
            coils.push(Coil::from_channel(ch, dev_head_t)?);
            channel_indices.push(idx);
        }

        if coils.is_empty() {
            return Err(DipoleError::NoData(
                "No good MEG channels in the channel list".to_string(),
            ));
        }

        debug!(
            "Sensor array: {} coils ({} gradiometers) from {} channels, {} bad",
            coils.len(),
            coils.iter().filter(|c| c.is_gradiometer()).count(),
            channels.len(),
            bads.len()
        );

        Ok(SensorArray {
            coils,
            channel_indices,
        })
    }

    pub fn coils(&self) -> &[Coil] {
        &self.coils
    }

    /// Indices into the channel list the array was built from
    pub fn channel_indices(&self) -> &[usize] {
        &self.channel_indices
    }

    pub fn names(&self) -> Vec<&str> {
        self.coils.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.coils.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coils.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn meg_channel(name: &str, coil_type: i32, position: Vec3) -> ChannelInfo {
        ChannelInfo {
            ch_name: name.to_string(),
            kind: FIFFV_MEG_CH,
            coil_type,
            loc: ChannelInfo::pack_loc(&position, &Vec3::x(), &Vec3::y(), &Vec3::z()),
        }
    }

    #[test]
    fn test_magnetometer_single_point() {
        let ch = meg_channel("MEG 0111", FIFFV_COIL_VV_MAG_T3, Vec3::new(0.0, 0.0, 0.1));
        let t = CoordTrans::identity(FIFFV_COORD_DEVICE, FIFFV_COORD_HEAD);
        let coil = Coil::from_channel(&ch, &t).unwrap();
        assert_eq!(coil.points.len(), 1);
        assert_eq!(coil.points[0].weight, 1.0);
        assert_eq!(coil.normal, Vec3::z());
        assert!(!coil.is_gradiometer());
    }

    #[test]
    fn test_gradiometer_points_straddle_origin() {
        let ch = meg_channel("MEG 0112", FIFFV_COIL_VV_PLANAR_T1, Vec3::new(0.0, 0.0, 0.1));
        let t = CoordTrans::translation(
            FIFFV_COORD_DEVICE,
            FIFFV_COORD_HEAD,
            Vec3::new(0.0, 0.0, 0.01),
        );
        let coil = Coil::from_channel(&ch, &t).unwrap();
        assert!(coil.is_gradiometer());
        assert_eq!(coil.points.len(), 2);
        assert_relative_eq!(coil.position, Vec3::new(0.0, 0.0, 0.11), epsilon = 1e-12);
        assert_relative_eq!(
            coil.points[0].position,
            Vec3::new(0.0084, 0.0, 0.11),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            coil.points[1].position,
            Vec3::new(-0.0084, 0.0, 0.11),
            epsilon = 1e-12
        );
        assert_relative_eq!(coil.points[0].weight, -coil.points[1].weight);
        assert_relative_eq!(coil.points[0].weight, 1.0 / 0.0168, epsilon = 1e-9);
    }

    #[test]
    fn test_from_channels_skips_non_meg_and_bads() {
        let mut stim = meg_channel("STI 014", FIFFV_COIL_NONE, Vec3::zeros());
        stim.kind = FIFFV_STIM_CH;
        let channels = vec![
            meg_channel("MEG 0111", FIFFV_COIL_VV_MAG_T3, Vec3::new(0.0, 0.0, 0.1)),
            stim,
            meg_channel("MEG 0112", FIFFV_COIL_VV_PLANAR_T1, Vec3::new(0.0, 0.02, 0.1)),
            meg_channel("MEG 0113", FIFFV_COIL_VV_PLANAR_T1, Vec3::new(0.0, 0.04, 0.1)),
        ];
        let t = CoordTrans::identity(FIFFV_COORD_DEVICE, FIFFV_COORD_HEAD);
        let bads = vec!["MEG 0112".to_string()];

        let array = SensorArray::from_channels(&channels, &t, &bads).unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.channel_indices(), &[0, 3]);
        assert_eq!(array.names(), vec!["MEG 0111", "MEG 0113"]);
    }

    #[test]
    fn test_from_channels_errors() {
        let t = CoordTrans::identity(FIFFV_COORD_DEVICE, FIFFV_COORD_HEAD);

        // Unsupported coil type
        let channels = vec![meg_channel("MEG 9999", 1234, Vec3::new(0.0, 0.0, 0.1))];
        assert!(matches!(
            SensorArray::from_channels(&channels, &t, &[]),
            Err(DipoleError::InvalidInput(_))
        ));

        // Zero normal
        let mut ch = meg_channel("MEG 0111", FIFFV_COIL_VV_MAG_T3, Vec3::new(0.0, 0.0, 0.1));
        ch.loc[9..12].copy_from_slice(&[0.0, 0.0, 0.0]);
        assert!(matches!(
            SensorArray::from_channels(&[ch], &t, &[]),
            Err(DipoleError::DegenerateGeometry(_))
        ));

        // Wrong transform direction
        let wrong = CoordTrans::identity(FIFFV_COORD_HEAD, FIFFV_COORD_DEVICE);
        let channels = vec![meg_channel("MEG 0111", FIFFV_COIL_VV_MAG_T3, Vec3::new(0.0, 0.0, 0.1))];
        assert!(SensorArray::from_channels(&channels, &wrong, &[]).is_err());

        // Nothing left
        assert!(matches!(
            SensorArray::from_channels(&[], &t, &[]),
            Err(DipoleError::NoData(_))
        ));
    }
}
