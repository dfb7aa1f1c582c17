//! GPU model discovery through the platform's hardware listing tool.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::model::PlatformFamily;

use super::CollectorError;

/// Look up the display adapters of this host, joined with ", ".
pub async fn detect_gpu(
    platform: PlatformFamily,
    timeout: Duration,
) -> Result<Option<String>, CollectorError> {
    let (program, args): (&str, &[&str]) = match platform {
        PlatformFamily::MacOs => ("system_profiler", &["SPDisplaysDataType"]),
        PlatformFamily::Windows => ("wmic", &["path", "win32_VideoController", "get", "name"]),
        PlatformFamily::Unix => ("lspci", &[]),
    };

    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| CollectorError::Timeout(timeout))?
    .map_err(|e| CollectorError::Source(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(CollectorError::Source(format!("{} exited with {}", program, output.status)));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let models = match platform {
        PlatformFamily::MacOs => parse_system_profiler(&stdout),
        PlatformFamily::Windows => parse_wmic(&stdout),
        PlatformFamily::Unix => parse_lspci(&stdout),
    };

    Ok((!models.is_empty()).then(|| models.join(", ")))
}

fn parse_lspci(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| {
            line.contains("VGA compatible controller")
                || line.contains("3D controller")
                || line.contains("Display controller")
        })
        .filter_map(|line| line.split_once(": "))
        .map(|(_, model)| model.trim().to_string())
        .collect()
}

fn parse_system_profiler(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Chipset Model:"))
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .collect()
}

fn parse_wmic(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lspci() {
        let output = "\
00:00.0 Host bridge: Intel Corporation 8th Gen Core Processor Host Bridge
00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 630
01:00.0 3D controller: NVIDIA Corporation TU117M [GeForce GTX 1650 Mobile]";
        assert_eq!(
            parse_lspci(output),
            vec![
                "Intel Corporation UHD Graphics 630".to_string(),
                "NVIDIA Corporation TU117M [GeForce GTX 1650 Mobile]".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_system_profiler() {
        let output = "\
Graphics/Displays:

    Apple M2:

      Chipset Model: Apple M2
      Type: GPU
      Bus: Built-In";
        assert_eq!(parse_system_profiler(output), vec!["Apple M2".to_string()]);
    }

    #[test]
    fn test_parse_wmic_skips_header() {
        let output = "Name\r\nNVIDIA GeForce RTX 3070\r\n\r\n";
        assert_eq!(parse_wmic(output), vec!["NVIDIA GeForce RTX 3070".to_string()]);
    }
}
