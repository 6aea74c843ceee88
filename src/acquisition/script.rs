//! Acquisition script parser, validator and renderer.
//!
//! Scripts are line oriented:
//!
//! ```text
//! # comment
//! VERSION 1.0
//! ACQUISITION
//! project: P1
//! experiment: E1
//! path: out/run1.zip
//! date: 2024-01-01
//! operator: A
//! num_steps: 2
//! sample: quartz
//! STEPS
//! 1	10	1	0	550	0	45	1
//! 2	10	1	0	560	0	90	2
//! ```
//!
//! Step lines carry exactly eight tab-separated fields: index, integration time
//! (ms), gain, z-position (mm), wavelength (nm), rotator-A angle, rotator-G
//! angle and filter code. The index is 1-based and must equal the line's
//! position among the steps. Parsing is all-or-nothing: any error discards the
//! whole result.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tracing::debug;

use super::model::{AcquisitionScript, Descriptor, FilterCode, Step};
use crate::error::{AcqResult, AcquisitionError};

const COMMENT_MARKER: char = '#';
const VERSION_DIRECTIVE: &str = "VERSION";
const HEADER_DIRECTIVE: &str = "ACQUISITION";
const STEPS_DIRECTIVE: &str = "STEPS";
const STEP_FIELD_COUNT: usize = 8;
const METADATA_LABEL: &str = "metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Header,
    Steps,
}

/// Header fields collected before validation.
#[derive(Debug, Default)]
struct HeaderBuilder {
    project: Option<String>,
    experiment: Option<String>,
    path: Option<String>,
    date: Option<String>,
    operator: Option<String>,
    num_steps: Option<usize>,
    metadata: BTreeMap<String, String>,
}

impl HeaderBuilder {
    fn apply(&mut self, line_no: usize, key: &str, value: &str) -> AcqResult<()> {
        let slot = match key {
            "project" => &mut self.project,
            "experiment" => &mut self.experiment,
            "path" => &mut self.path,
            "date" => &mut self.date,
            "operator" => &mut self.operator,
            "num_steps" => {
                if self.num_steps.is_some() {
                    return Err(duplicate_key(line_no, key));
                }
                let count = value.parse::<usize>().map_err(|_| AcquisitionError::ScriptSyntax {
                    line: line_no,
                    message: format!("num_steps must be a non-negative integer, got '{value}'"),
                })?;
                self.num_steps = Some(count);
                return Ok(());
            }
            // Section label kept for compatibility with older scripts.
            METADATA_LABEL if value.is_empty() => return Ok(()),
            _ => {
                if self.metadata.contains_key(key) {
                    return Err(duplicate_key(line_no, key));
                }
                self.metadata.insert(key.to_string(), value.to_string());
                return Ok(());
            }
        };

        if slot.is_some() {
            return Err(duplicate_key(line_no, key));
        }
        *slot = Some(value.to_string());
        Ok(())
    }

    fn build(self) -> AcqResult<Descriptor> {
        let mut missing = Vec::new();
        if self.project.is_none() {
            missing.push("project");
        }
        if self.experiment.is_none() {
            missing.push("experiment");
        }
        if self.path.is_none() {
            missing.push("path");
        }
        if self.date.is_none() {
            missing.push("date");
        }
        if self.operator.is_none() {
            missing.push("operator");
        }
        if self.num_steps.is_none() {
            missing.push("num_steps");
        }

        match (
            self.project,
            self.experiment,
            self.path,
            self.date,
            self.operator,
            self.num_steps,
        ) {
            (
                Some(project),
                Some(experiment),
                Some(path),
                Some(date),
                Some(operator),
                Some(num_steps),
            ) => Ok(Descriptor {
                project,
                experiment,
                path,
                date,
                operator,
                metadata: self.metadata,
                num_steps,
            }),
            _ => Err(AcquisitionError::ScriptValidation(format!(
                "ACQUISITION section is missing required fields: {}",
                missing.join(", ")
            ))),
        }
    }
}

fn duplicate_key(line_no: usize, key: &str) -> AcquisitionError {
    AcquisitionError::ScriptSyntax {
        line: line_no,
        message: format!("duplicate header key '{key}'"),
    }
}

/// Parse and validate an acquisition script.
///
/// # Errors
///
/// - `ScriptSyntax` for malformed directives, header lines or step arity
/// - `StepField` for a step value that fails coercion or range/membership checks
/// - `ScriptValidation` for a missing header field or a step count mismatch
pub fn parse(text: &str) -> AcqResult<AcquisitionScript> {
    let mut section = Section::Preamble;
    let mut version = None;
    let mut header = HeaderBuilder::default();
    let mut seen_header = false;
    let mut steps = Vec::new();

    for (offset, raw_line) in text.lines().enumerate() {
        let line_no = offset + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(COMMENT_MARKER) {
            continue;
        }

        if let Some(rest) = line.strip_prefix(VERSION_DIRECTIVE) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                let token = rest.split_whitespace().next().ok_or_else(|| {
                    AcquisitionError::ScriptSyntax {
                        line: line_no,
                        message: "VERSION directive without a version token".into(),
                    }
                })?;
                version = Some(token.to_string());
                continue;
            }
        }

        if line == HEADER_DIRECTIVE {
            if seen_header || section == Section::Steps {
                return Err(AcquisitionError::ScriptSyntax {
                    line: line_no,
                    message: "ACQUISITION directive must appear once, before STEPS".into(),
                });
            }
            seen_header = true;
            section = Section::Header;
            continue;
        }

        if line == STEPS_DIRECTIVE {
            if section == Section::Steps {
                return Err(AcquisitionError::ScriptSyntax {
                    line: line_no,
                    message: "repeated STEPS directive".into(),
                });
            }
            section = Section::Steps;
            continue;
        }

        match section {
            Section::Preamble => {
                return Err(AcquisitionError::ScriptSyntax {
                    line: line_no,
                    message: format!("unexpected line before ACQUISITION: '{line}'"),
                });
            }
            Section::Header => {
                let (key, value) =
                    line.split_once(':')
                        .ok_or_else(|| AcquisitionError::ScriptSyntax {
                            line: line_no,
                            message: format!("expected 'key: value', got '{line}'"),
                        })?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(AcquisitionError::ScriptSyntax {
                        line: line_no,
                        message: "empty header key".into(),
                    });
                }
                header.apply(line_no, key, value.trim())?;
            }
            Section::Steps => steps.push(parse_step(line_no, steps.len(), line)?),
        }
    }

    let descriptor = header.build()?;
    if steps.len() != descriptor.num_steps {
        return Err(AcquisitionError::ScriptValidation(format!(
            "number of steps read ({}) does not match declared num_steps ({})",
            steps.len(),
            descriptor.num_steps
        )));
    }

    debug!(
        project = %descriptor.project,
        experiment = %descriptor.experiment,
        steps = steps.len(),
        "Parsed acquisition script"
    );

    Ok(AcquisitionScript {
        version,
        descriptor,
        steps,
    })
}

fn parse_step(line_no: usize, position: usize, line: &str) -> AcqResult<Step> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() != STEP_FIELD_COUNT {
        return Err(AcquisitionError::ScriptSyntax {
            line: line_no,
            message: format!(
                "step line must have {STEP_FIELD_COUNT} tab-separated fields, found {}",
                fields.len()
            ),
        });
    }

    let index = fields[0]
        .parse::<u32>()
        .map_err(|e| field_error(line_no, "step index", fields[0], e.to_string()))?;
    if index == 0 {
        return Err(field_error(line_no, "step index", fields[0], "must be at least 1"));
    }
    if index as usize != position + 1 {
        return Err(field_error(
            line_no,
            "step index",
            fields[0],
            format!("step lines are numbered from 1, expected {}", position + 1),
        ));
    }

    let integration_ms = parse_number(line_no, "integration time", fields[1])?;
    if integration_ms <= 0.0 {
        return Err(field_error(line_no, "integration time", fields[1], "must be positive"));
    }

    let gain = parse_number(line_no, "gain", fields[2])?;
    if gain < 0.0 {
        return Err(field_error(line_no, "gain", fields[2], "must not be negative"));
    }

    let z_position_mm = parse_number(line_no, "z-position", fields[3])?;
    let wavelength_nm = parse_number(line_no, "wavelength", fields[4])?;
    let angle_a_deg = parse_angle(line_no, "rotator-A angle", fields[5])?;
    let angle_g_deg = parse_angle(line_no, "rotator-G angle", fields[6])?;

    let filter = fields[7].parse::<FilterCode>().map_err(|_| {
        field_error(line_no, "filter code", fields[7], "allowed values are 1, 2, 3 or 4")
    })?;

    Ok(Step {
        index,
        integration_ms,
        gain,
        z_position_mm,
        wavelength_nm,
        angle_a_deg,
        angle_g_deg,
        filter,
    })
}

fn parse_number(line_no: usize, field: &'static str, literal: &str) -> AcqResult<f64> {
    let value = literal
        .parse::<f64>()
        .map_err(|e| field_error(line_no, field, literal, e.to_string()))?;
    if !value.is_finite() {
        return Err(field_error(line_no, field, literal, "must be a finite number"));
    }
    Ok(value)
}

fn parse_angle(line_no: usize, field: &'static str, literal: &str) -> AcqResult<f64> {
    let value = parse_number(line_no, field, literal)?;
    if !(0.0..=360.0).contains(&value) {
        return Err(field_error(line_no, field, literal, "must be within 0-360 degrees"));
    }
    Ok(value)
}

fn field_error(
    line: usize,
    field: &'static str,
    literal: &str,
    reason: impl Into<String>,
) -> AcquisitionError {
    AcquisitionError::StepField {
        line,
        field,
        literal: literal.to_string(),
        reason: reason.into(),
    }
}

/// Render a parsed script back to canonical script text.
///
/// Metadata entries are written in key order. `parse(&render(s))` yields a
/// script equal to `s`.
pub fn render(script: &AcquisitionScript) -> String {
    let d = &script.descriptor;
    let mut out = String::new();

    if let Some(version) = &script.version {
        let _ = writeln!(out, "{VERSION_DIRECTIVE} {version}");
    }
    let _ = writeln!(out, "{HEADER_DIRECTIVE}");
    let _ = writeln!(out, "project: {}", d.project);
    let _ = writeln!(out, "experiment: {}", d.experiment);
    let _ = writeln!(out, "path: {}", d.path);
    let _ = writeln!(out, "date: {}", d.date);
    let _ = writeln!(out, "operator: {}", d.operator);
    let _ = writeln!(out, "num_steps: {}", d.num_steps);
    for (key, value) in &d.metadata {
        let _ = writeln!(out, "{key}: {value}");
    }
    let _ = writeln!(out, "{STEPS_DIRECTIVE}");
    for step in &script.steps {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            step.index,
            step.integration_ms,
            step.gain,
            step.z_position_mm,
            step.wavelength_nm,
            step.angle_a_deg,
            step.angle_g_deg,
            step.filter
        );
    }
    out
}
