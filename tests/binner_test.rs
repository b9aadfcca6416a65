use ndarray::Array2;
use stemclass::{
    bin_peaks, BinCollision, BraggPeak, PeakBinner, PeakSource, PointListArray, RuntimeConfig,
};

fn setup_binner(qx: usize, qy: usize, bin_x: usize, bin_y: usize) -> PeakBinner {
    PeakBinner::builder()
        .with_detector_shape(qx, qy)
        .unwrap()
        .with_bin_size(bin_x, bin_y)
        .unwrap()
        .build()
        .expect("Failed to create binner")
}

/// Deterministic scan with a varying number of peaks per position,
/// including empty positions and bin collisions.
fn busy_scan(nx: usize, ny: usize, q: usize) -> PointListArray {
    let mut peaks = PointListArray::new(nx, ny);
    for rx in 0..nx {
        for ry in 0..ny {
            let n = (rx * 7 + ry * 3) % 5;
            for i in 0..n {
                let qx = ((rx * 13 + i * 17) % q) as f64 + 0.3;
                let qy = ((ry * 11 + i * 5) % q) as f64 + 0.6;
                peaks
                    .add_peak(rx, ry, BraggPeak::new(qx, qy, (i + 1) as f64 * 1.5))
                    .unwrap();
            }
        }
    }
    peaks
}

#[test]
fn test_empty_scan_gives_zero_histogram() -> Result<(), Box<dyn std::error::Error>> {
    let peaks = PointListArray::new(3, 5);
    let histogram = setup_binner(16, 12, 4, 3).bin(&peaks)?;

    assert_eq!(histogram.data().dim(), (3, 5, 16));
    assert!(histogram.data().iter().all(|&v| v == 0.0));
    Ok(())
}

#[test]
fn test_single_peak_lands_in_first_bin() -> Result<(), Box<dyn std::error::Error>> {
    let mut peaks = PointListArray::new(2, 2);
    peaks.add_peak(1, 0, BraggPeak::new(0.0, 0.0, 5.0))?;
    let histogram = setup_binner(4, 4, 2, 2).bin(&peaks)?;

    let bins = histogram.bins(1, 0).expect("position inside scan");
    assert_eq!(bins.to_vec(), vec![5.0, 0.0, 0.0, 0.0]);
    assert_eq!(histogram.data().sum(), 5.0);
    Ok(())
}

#[test]
fn test_bins_are_ordered_x_fastest() -> Result<(), Box<dyn std::error::Error>> {
    let mut peaks = PointListArray::new(1, 1);
    peaks.set_point_list(
        0,
        0,
        vec![
            BraggPeak::new(5.0, 0.5, 1.0),
            BraggPeak::new(0.5, 5.0, 2.0),
            BraggPeak::new(5.9, 5.9, 3.0),
        ],
    )?;
    // 6x6 detector, 3x3 bins: two bins per axis
    let histogram = setup_binner(6, 6, 3, 3).bin(&peaks)?;
    assert_eq!(histogram.bins(0, 0).unwrap().to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
    Ok(())
}

#[test]
fn test_masked_peak_is_excluded() -> Result<(), Box<dyn std::error::Error>> {
    let mut mask = Array2::from_elem((4, 4), true);
    mask[[1, 1]] = false;

    let mut peaks = PointListArray::new(1, 1);
    peaks.add_peak(0, 0, BraggPeak::new(1.2, 0.9, 8.0))?;
    peaks.add_peak(0, 0, BraggPeak::new(3.0, 3.0, 4.0))?;

    let histogram = bin_peaks(&peaks, 4, 4, 2, 2, Some(mask))?;
    assert_eq!(histogram.bins(0, 0).unwrap().to_vec(), vec![0.0, 0.0, 0.0, 4.0]);
    Ok(())
}

#[test]
fn test_mask_lookup_rounds_ties_to_even() -> Result<(), Box<dyn std::error::Error>> {
    let mut mask = Array2::from_elem((4, 4), true);
    mask[[3, 1]] = false;
    mask[[0, 2]] = false;

    let mut peaks = PointListArray::new(1, 2);
    // 2.5 rounds to pixel 2, which is unmasked
    peaks.add_peak(0, 0, BraggPeak::new(2.5, 1.0, 9.0))?;
    // 1.5 rounds to pixel 2 along y, and 0.5 to pixel 0 along x: masked
    peaks.add_peak(0, 1, BraggPeak::new(0.5, 1.5, 6.0))?;

    let histogram = bin_peaks(&peaks, 4, 4, 2, 2, Some(mask))?;
    assert_eq!(histogram.bins(0, 0).unwrap().to_vec(), vec![0.0, 9.0, 0.0, 0.0]);
    assert_eq!(histogram.bins(0, 1).unwrap().to_vec(), vec![0.0, 0.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn test_without_mask_every_peak_counts() -> Result<(), Box<dyn std::error::Error>> {
    let mut peaks = PointListArray::new(1, 1);
    peaks.add_peak(0, 0, BraggPeak::new(1.2, 0.9, 8.0))?;
    peaks.add_peak(0, 0, BraggPeak::new(3.0, 3.0, 4.0))?;

    let histogram = bin_peaks(&peaks, 4, 4, 2, 2, None)?;
    assert_eq!(histogram.bins(0, 0).unwrap().to_vec(), vec![8.0, 0.0, 0.0, 4.0]);
    Ok(())
}

#[test]
fn test_collision_policies() -> Result<(), Box<dyn std::error::Error>> {
    let mut peaks = PointListArray::new(1, 1);
    peaks.add_peak(0, 0, BraggPeak::new(0.2, 0.2, 2.0))?;
    peaks.add_peak(0, 0, BraggPeak::new(1.8, 1.1, 3.0))?;

    let overwrite = setup_binner(4, 4, 2, 2).bin(&peaks)?;
    assert_eq!(overwrite.bins(0, 0).unwrap()[0], 3.0);

    let accumulate = PeakBinner::builder()
        .with_detector_shape(4, 4)?
        .with_bin_size(2, 2)?
        .with_collision(BinCollision::Accumulate)
        .build()?
        .bin(&peaks)?;
    assert_eq!(accumulate.bins(0, 0).unwrap()[0], 5.0);
    Ok(())
}

#[test]
fn test_binning_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let peaks = busy_scan(6, 5, 32);
    let binner = setup_binner(32, 32, 4, 8);

    let first = binner.bin(&peaks)?;
    let second = binner.bin(&peaks)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_parallel_matches_serial() -> Result<(), Box<dyn std::error::Error>> {
    let peaks = busy_scan(9, 7, 32);
    let build = |runtime: RuntimeConfig, collision: BinCollision| {
        PeakBinner::builder()
            .with_detector_shape(32, 32)?
            .with_bin_size(4, 4)?
            .with_collision(collision)
            .with_runtime_config(runtime)
            .build()
    };

    for collision in [BinCollision::Overwrite, BinCollision::Accumulate] {
        let serial = build(RuntimeConfig::serial(), collision)?.bin(&peaks)?;
        let global = build(RuntimeConfig::parallel(), collision)?.bin(&peaks)?;
        let dedicated = build(RuntimeConfig::with_threads(3), collision)?.bin(&peaks)?;
        assert_eq!(serial, global);
        assert_eq!(serial, dedicated);
    }
    Ok(())
}

#[test]
fn test_empty_positions_stay_zero() -> Result<(), Box<dyn std::error::Error>> {
    let peaks = busy_scan(4, 4, 16);
    let histogram = setup_binner(16, 16, 4, 4).bin(&peaks)?;

    for rx in 0..4 {
        for ry in 0..4 {
            let bins = histogram.bins(rx, ry).unwrap();
            if peaks.point_list(rx, ry).is_empty() {
                assert!(bins.iter().all(|&v| v == 0.0));
            } else {
                assert!(bins.iter().any(|&v| v > 0.0));
            }
        }
    }
    Ok(())
}

#[test]
fn test_binner_info() {
    let mask = Array2::from_elem((8, 4), true);
    let binner = PeakBinner::builder()
        .with_detector_shape(8, 4)
        .unwrap()
        .with_bin_size(2, 2)
        .unwrap()
        .with_mask(mask)
        .build()
        .unwrap();

    let info = binner.info();
    assert_eq!(info.detector_shape, (8, 4));
    assert_eq!(info.bins_per_axis, (4, 2));
    assert_eq!(info.n_bins, 8);
    assert!(info.masked);
    assert_eq!(info.collision, BinCollision::Overwrite);
}
