use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Resource quantities for nodes and pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

/// Multiplier named by a quantity suffix
enum Multiplier {
    /// 2^(10 * n)
    Binary(u32),
    /// 10^n
    Decimal(i32),
}

fn parse_suffix(suffix: &str) -> Result<Multiplier, String> {
    let multiplier = match suffix {
        "" => Multiplier::Decimal(0),
        "Ki" => Multiplier::Binary(1),
        "Mi" => Multiplier::Binary(2),
        "Gi" => Multiplier::Binary(3),
        "Ti" => Multiplier::Binary(4),
        "Pi" => Multiplier::Binary(5),
        "Ei" => Multiplier::Binary(6),
        "n" => Multiplier::Decimal(-9),
        "u" => Multiplier::Decimal(-6),
        "m" => Multiplier::Decimal(-3),
        "k" => Multiplier::Decimal(3),
        "M" => Multiplier::Decimal(6),
        "G" => Multiplier::Decimal(9),
        "T" => Multiplier::Decimal(12),
        "P" => Multiplier::Decimal(15),
        "E" => Multiplier::Decimal(18),
        other => {
            let exponent = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))
                .ok_or_else(|| format!("unknown suffix '{}'", other))?;
            let exponent = exponent
                .parse::<i32>()
                .map_err(|_| format!("invalid exponent '{}'", other))?;
            Multiplier::Decimal(exponent)
        }
    };
    Ok(multiplier)
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

/// Parse a Kubernetes quantity and express it in units of `10^-scale`,
/// rounding fractions up.
///
/// Accepts an optional `+`, a decimal number (`1`, `1.5`, `.5`) and one of
/// the binary (`Ki`..`Ei`), decimal (`n`, `u`, `m`, `k`..`E`) or exponent
/// (`e3`, `E-2`) suffixes. Negative quantities are rejected.
fn parse_quantity(s: &str, scale: i32) -> Result<i64, String> {
    let trimmed = s.trim();
    if trimmed.starts_with('-') {
        return Err(format!("negative quantity '{}'", s));
    }
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("missing number in '{}'", s));
    }
    if fraction.contains('.') {
        return Err(format!("invalid number in '{}'", s));
    }

    let overflow = || format!("quantity '{}' is out of range", s);

    // Digits of the mantissa with the decimal point removed
    let mut mantissa: i128 = 0;
    for digit in whole.chars().chain(fraction.chars()) {
        let value = i128::from(digit as u8 - b'0');
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(value))
            .ok_or_else(overflow)?;
    }

    let fraction_digits = i32::try_from(fraction.len()).map_err(|_| overflow())?;
    let (binary, decimal) = match parse_suffix(suffix)? {
        Multiplier::Binary(n) => (10 * n, 0),
        Multiplier::Decimal(n) => (0, n),
    };

    let exponent = decimal
        .checked_add(scale)
        .and_then(|e| e.checked_sub(fraction_digits))
        .ok_or_else(overflow)?;

    let mut numerator = mantissa
        .checked_mul(2i128.checked_pow(binary).ok_or_else(overflow)?)
        .ok_or_else(overflow)?;
    let mut denominator: i128 = 1;
    if exponent >= 0 {
        numerator = numerator
            .checked_mul(pow10(exponent.unsigned_abs()).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
    } else {
        match pow10(exponent.unsigned_abs()) {
            Some(d) => denominator = d,
            // Smaller than one unit
            None => return Ok(if numerator == 0 { 0 } else { 1 }),
        }
    }

    let mut value = numerator / denominator;
    if numerator % denominator != 0 {
        value += 1;
    }
    i64::try_from(value).map_err(|_| overflow())
}

impl ResourceQuantities {
    /// Parse CPU quantity into millicores (e.g., "2", "1000m", "0.5", "1e3m")
    pub fn parse_cpu(s: &str) -> Result<i64, String> {
        parse_quantity(s, 3).map_err(|e| format!("Invalid CPU quantity: {}", e))
    }

    /// Parse memory quantity into bytes (e.g., "128Mi", "1.5Gi", "64G", "1024")
    pub fn parse_memory(s: &str) -> Result<i64, String> {
        parse_quantity(s, 0).map_err(|e| format!("Invalid memory quantity: {}", e))
    }

    /// Get CPU and memory from a resource map (k8s-openapi format).
    ///
    /// Missing entries count as zero; malformed ones are an error.
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Result<Self, String> {
        let cpu_millicores = match resources.get("cpu") {
            Some(q) => Self::parse_cpu(&q.0)?,
            None => 0,
        };
        let memory_bytes = match resources.get("memory") {
            Some(q) => Self::parse_memory(&q.0)?,
            None => 0,
        };

        Ok(Self {
            cpu_millicores,
            memory_bytes,
        })
    }

    /// Sum of the requests of every container in the pod
    pub fn pod_requests(pod: &Pod) -> Result<Self, String> {
        let mut total = Self::default();

        let Some(spec) = &pod.spec else {
            return Ok(total);
        };

        for container in &spec.containers {
            if let Some(requests) = container
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
            {
                let requested = Self::from_k8s_resource_map(requests)
                    .map_err(|e| format!("container '{}': {}", container.name, e))?;
                total = total
                    .checked_add(&requested)
                    .ok_or_else(|| "total resource requests are out of range".to_string())?;
            }
        }

        Ok(total)
    }

    /// Allocatable capacity advertised in the node status
    pub fn node_allocatable(node: &Node) -> Result<Self, String> {
        match node.status.as_ref().and_then(|s| s.allocatable.as_ref()) {
            Some(allocatable) => Self::from_k8s_resource_map(allocatable),
            None => Ok(Self::default()),
        }
    }

    pub fn checked_add(&self, other: &ResourceQuantities) -> Option<Self> {
        Some(Self {
            cpu_millicores: self.cpu_millicores.checked_add(other.cpu_millicores)?,
            memory_bytes: self.memory_bytes.checked_add(other.memory_bytes)?,
        })
    }

    /// Whether `request` fits inside these quantities
    pub fn fits(&self, request: &ResourceQuantities) -> bool {
        request.cpu_millicores <= self.cpu_millicores && request.memory_bytes <= self.memory_bytes
    }
}
