use numpy::PyArray1;
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use rrc_lib::{analyze_trace, read_pcap, AnalysisFilter, PacketAnalyzerResult, Profile, ProfileType, RrcAggregate, RrcError};
use std::net::IpAddr;
use std::path::Path;

fn to_py_err(e: RrcError) -> PyErr {
    match e {
        RrcError::Io(_) | RrcError::Pcap(_) => PyIOError::new_err(e.to_string()),
        _ => PyValueError::new_err(e.to_string()),
    }
}

/**
 * Profile from a properties file, else the default of `network`, else LTE
 */
fn load_profile(network: Option<&str>, profile_file: Option<&str>) -> Result<Profile, RrcError> {
    match (profile_file, network) {
        (Some(path), _) => Profile::load(Path::new(path)),
        (None, Some(raw)) => Ok(Profile::default_for(ProfileType::parse(raw)?)),
        (None, None) => Ok(Profile::default_lte()),
    }
}

fn run(
    path: &str,
    network: Option<&str>,
    profile_file: Option<&str>,
    device_ip: Option<&str>,
) -> PyResult<PacketAnalyzerResult> {
    let profile = load_profile(network, profile_file).map_err(to_py_err)?;
    let device_ip = device_ip
        .map(|raw| raw.parse::<IpAddr>())
        .transpose()
        .map_err(|e| PyValueError::new_err(format!("invalid device ip: {e}")))?;
    let trace = read_pcap(Path::new(path), device_ip).map_err(to_py_err)?;
    Ok(analyze_trace(&trace, Some(&profile), &AnalysisFilter::default()))
}

#[pymodule]
fn rrc_analysis<'py>(_py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    /**
     * RRC state ranges of a pcap capture
     *
     * \returns (begin, end, state code), each a numpy array with one
     *          entry per range.
     */
    #[allow(dead_code)]
    #[pyfn(m)]
    #[pyo3(signature = (path, network=None, profile_file=None, device_ip=None))]
    fn rrc_ranges<'py>(
        py: Python<'py>,
        path: &str,
        network: Option<&str>,
        profile_file: Option<&str>,
        device_ip: Option<&str>,
    ) -> PyResult<(
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray1<u8>>,
    )> {
        let result = run(path, network, profile_file, device_ip)?;
        let ranges = result.state_machine.ranges();
        Ok((
            PyArray1::from_iter_bound(py, ranges.iter().map(|r| r.begin_time)),
            PyArray1::from_iter_bound(py, ranges.iter().map(|r| r.end_time)),
            PyArray1::from_iter_bound(py, ranges.iter().map(|r| r.state.code())),
        ))
    }

    /**
     * Bursts of a pcap capture
     *
     * \returns (begin, end, category code, energy), each a numpy array
     *          with one entry per burst.
     */
    #[allow(dead_code)]
    #[pyfn(m)]
    #[pyo3(signature = (path, network=None, profile_file=None, device_ip=None))]
    fn bursts<'py>(
        py: Python<'py>,
        path: &str,
        network: Option<&str>,
        profile_file: Option<&str>,
        device_ip: Option<&str>,
    ) -> PyResult<(
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray1<u8>>,
        Bound<'py, PyArray1<f64>>,
    )> {
        let result = run(path, network, profile_file, device_ip)?;
        let bursts = &result.burst_collection.bursts;
        Ok((
            PyArray1::from_iter_bound(py, bursts.iter().map(|b| b.begin_time)),
            PyArray1::from_iter_bound(py, bursts.iter().map(|b| b.end_time)),
            PyArray1::from_iter_bound(py, bursts.iter().map(|b| b.category.code())),
            PyArray1::from_iter_bound(py, bursts.iter().map(|b| b.energy)),
        ))
    }

    /**
     * Energy totals of a pcap capture as a dict
     */
    #[allow(dead_code)]
    #[pyfn(m)]
    #[pyo3(signature = (path, network=None, profile_file=None, device_ip=None))]
    fn energy_summary<'py>(
        py: Python<'py>,
        path: &str,
        network: Option<&str>,
        profile_file: Option<&str>,
        device_ip: Option<&str>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let result = run(path, network, profile_file, device_ip)?;
        let machine = &result.state_machine;
        let energy = &result.energy_model;

        let dict = PyDict::new_bound(py);
        dict.set_item("profile", result.profile.profile_type().as_str())?;
        dict.set_item("trace_duration", machine.trace_duration())?;
        dict.set_item("packets_duration", machine.packets_duration())?;
        dict.set_item("total_rrc_energy", machine.total_rrc_energy())?;
        dict.set_item("joules_per_kilobyte", machine.joules_per_kilobyte())?;
        dict.set_item("total_gps_energy", energy.total_gps_energy)?;
        dict.set_item("camera_energy", energy.camera_energy)?;
        dict.set_item("total_wifi_energy", energy.total_wifi_energy)?;
        dict.set_item("total_bluetooth_energy", energy.total_bluetooth_energy)?;
        dict.set_item("screen_energy", energy.screen_energy)?;
        dict.set_item("total_energy", energy.total_energy())?;
        dict.set_item("burst_count", result.burst_collection.bursts.len())?;
        dict.set_item("long_burst_count", result.burst_collection.long_burst_count)?;
        Ok(dict)
    }

    Ok(())
}
