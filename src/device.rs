// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Device descriptors.
//!
//! A [`Device`] names where a hash map's storage lives and how its batches
//! execute. Descriptors are written as `TYPE:ID`, e.g. `CPU:0` or `CUDA:1`.

use crate::error::{Error, Result};

use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cpu,
    Cuda,
}

impl DeviceType {
    fn as_str(self) -> &'static str {
        match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Cuda => "CUDA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    device_type: DeviceType,
    id: u32,
}

impl Device {
    pub const fn new(device_type: DeviceType, id: u32) -> Self {
        Self { device_type, id }
    }

    pub const fn cpu() -> Self {
        Self::new(DeviceType::Cpu, 0)
    }

    pub const fn cuda(id: u32) -> Self {
        Self::new(DeviceType::Cuda, id)
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_type.as_str(), self.id)
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (type_str, id_str) = s
            .split_once(':')
            .ok_or_else(|| Error::Device(format!("{:?} is not of the form TYPE:ID", s)))?;

        let device_type = match type_str.to_ascii_uppercase().as_str() {
            "CPU" => DeviceType::Cpu,
            "CUDA" => DeviceType::Cuda,
            other => return Err(Error::Device(format!("unknown device type {:?}", other))),
        };

        let id = id_str
            .parse()
            .map_err(|e| Error::Device(format!("bad device id {:?}: {}", id_str, e)))?;

        Ok(Self::new(device_type, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let cpu: Device = "CPU:0".parse().unwrap();
        assert_eq!(cpu, Device::cpu());
        assert_eq!(cpu.to_string(), "CPU:0");

        let cuda: Device = "cuda:3".parse().unwrap();
        assert_eq!(cuda.device_type(), DeviceType::Cuda);
        assert_eq!(cuda.id(), 3);
        assert_eq!(cuda.to_string(), "CUDA:3");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!("CPU".parse::<Device>(), Err(Error::Device(_))));
        assert!(matches!("TPU:0".parse::<Device>(), Err(Error::Device(_))));
        assert!(matches!("CPU:x".parse::<Device>(), Err(Error::Device(_))));
    }
}
