/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use proto::tasker::StartJobRequest;
use thiserror::Error;

use super::cgroups::{IoLimits, Limits};

pub type Result<T> = std::result::Result<T, ValidationError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("command is required")]
    MissingCommand,
    #[error("device is required when IO limits are set")]
    MissingDevice,
    #[error("cpu limit must be a positive number of cores")]
    InvalidCpu,
    #[error("memory limit must be positive")]
    InvalidMemory,
}

/// A [StartJobRequest] whose fields have been checked and converted to
/// domain types.
#[derive(Debug)]
pub struct ValidatedStartJobRequest {
    pub command: String,
    pub args: Vec<String>,
    pub limits: Limits,
}

impl ValidatedStartJobRequest {
    pub fn validate(request: StartJobRequest) -> Result<Self> {
        let StartJobRequest { command, args, limits } = request;

        if command.is_empty() {
            return Err(ValidationError::MissingCommand);
        }

        let limits = match limits {
            None => Limits::default(),
            Some(limits) => {
                if matches!(limits.cpu, Some(cpu) if !cpu.is_finite() || cpu <= 0.0)
                {
                    return Err(ValidationError::InvalidCpu);
                }

                if limits.memory == Some(0) {
                    return Err(ValidationError::InvalidMemory);
                }

                let io = match limits.io {
                    None => None,
                    Some(io) => {
                        if io.device.is_empty() {
                            return Err(ValidationError::MissingDevice);
                        }

                        Some(IoLimits {
                            device: io.device,
                            read: io.read,
                            write: io.write,
                        })
                    }
                };

                Limits { cpu: limits.cpu, memory: limits.memory, io }
            }
        };

        Ok(Self { command, args, limits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::tasker::{IoLimits as ProtoIoLimits, ResourceLimits};

    #[test]
    fn test_empty_command() {
        let request = StartJobRequest::default();
        assert_eq!(
            ValidatedStartJobRequest::validate(request).unwrap_err(),
            ValidationError::MissingCommand
        );
    }

    #[test]
    fn test_no_limits() {
        let request = StartJobRequest {
            command: "echo".into(),
            args: vec!["hello".into()],
            limits: None,
        };

        let validated =
            ValidatedStartJobRequest::validate(request).expect("valid");
        assert_eq!(validated.command, "echo");
        assert_eq!(validated.args, vec!["hello".to_owned()]);
        assert!(validated.limits.cpu.is_none());
        assert!(validated.limits.memory.is_none());
        assert!(validated.limits.io.is_none());
    }

    #[test]
    fn test_io_limits_require_device() {
        let request = StartJobRequest {
            command: "echo".into(),
            args: vec![],
            limits: Some(ResourceLimits {
                cpu: None,
                memory: None,
                io: Some(ProtoIoLimits {
                    device: String::new(),
                    read: Some(100),
                    write: None,
                }),
            }),
        };

        assert_eq!(
            ValidatedStartJobRequest::validate(request).unwrap_err(),
            ValidationError::MissingDevice
        );
    }

    #[test]
    fn test_cpu_must_be_positive() {
        for cpu in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let request = StartJobRequest {
                command: "echo".into(),
                args: vec![],
                limits: Some(ResourceLimits {
                    cpu: Some(cpu),
                    memory: None,
                    io: None,
                }),
            };

            assert_eq!(
                ValidatedStartJobRequest::validate(request).unwrap_err(),
                ValidationError::InvalidCpu
            );
        }
    }

    #[test]
    fn test_memory_must_be_positive() {
        let request = StartJobRequest {
            command: "echo".into(),
            args: vec![],
            limits: Some(ResourceLimits {
                cpu: None,
                memory: Some(0),
                io: None,
            }),
        };

        assert_eq!(
            ValidatedStartJobRequest::validate(request).unwrap_err(),
            ValidationError::InvalidMemory
        );
    }

    #[test]
    fn test_full_limits_are_converted() {
        let request = StartJobRequest {
            command: "sleep".into(),
            args: vec!["60".into()],
            limits: Some(ResourceLimits {
                cpu: Some(0.5),
                memory: Some(512),
                io: Some(ProtoIoLimits {
                    device: "/dev/sda".into(),
                    read: Some(100),
                    write: Some(50),
                }),
            }),
        };

        let validated =
            ValidatedStartJobRequest::validate(request).expect("valid");
        assert_eq!(validated.limits.cpu, Some(0.5));
        assert_eq!(validated.limits.memory, Some(512));

        let io = validated.limits.io.expect("io limits");
        assert_eq!(io.device, "/dev/sda");
        assert_eq!(io.read, Some(100));
        assert_eq!(io.write, Some(50));
    }
}
