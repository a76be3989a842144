//! The isotope labels that can be corrected for and their natural abundances.
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Isotope {0} is not supported")]
pub struct UnsupportedIsotope(pub String);

/// A stable isotope used as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IsotopeLabel {
    #[cfg_attr(feature = "serde", serde(rename = "13C"))]
    C13,
    #[cfg_attr(feature = "serde", serde(rename = "2H"))]
    H2,
    #[cfg_attr(feature = "serde", serde(rename = "15N"))]
    N15,
}

static CARBON_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*[Cc](?P<max>\d+)").unwrap());
static HYDROGEN_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*[Hh](?P<max>\d+)").unwrap());
static NITROGEN_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*[Nn](?P<max>\d+)").unwrap());

impl IsotopeLabel {
    pub const ALL: [IsotopeLabel; 3] = [Self::C13, Self::H2, Self::N15];

    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::C13 => "13C",
            Self::H2 => "2H",
            Self::N15 => "15N",
        }
    }

    pub const fn element(&self) -> &'static str {
        match self {
            Self::C13 => "Carbon",
            Self::H2 => "Hydrogen",
            Self::N15 => "Nitrogen",
        }
    }

    pub const fn element_symbol(&self) -> &'static str {
        match self {
            Self::C13 => "C",
            Self::H2 => "H",
            Self::N15 => "N",
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::C13 => "Carbon-13",
            Self::H2 => "Deuterium",
            Self::N15 => "Nitrogen-15",
        }
    }

    /// The probability that any one atom of this element is the heavy isotope
    pub const fn natural_abundance(&self) -> f64 {
        match self {
            Self::C13 => 0.01109,
            Self::H2 => 0.00015,
            Self::N15 => 0.00370,
        }
    }

    pub fn is_supported(symbol: &str) -> bool {
        symbol.parse::<Self>().is_ok()
    }

    fn count_pattern(&self) -> &'static Regex {
        match self {
            Self::C13 => &CARBON_COUNT,
            Self::H2 => &HYDROGEN_COUNT,
            Self::N15 => &NITROGEN_COUNT,
        }
    }

    /// The number of atoms of this isotope's element in `formula`.
    ///
    /// The element letter is matched case-insensitively and must be directly
    /// followed by a count. When the letter occurs more than once, the last
    /// occurrence wins. A formula without a count for the element yields 0.
    pub fn maximum(&self, formula: &str) -> u32 {
        self.count_pattern()
            .captures(formula)
            .and_then(|caps| caps.name("max"))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    }
}

impl FromStr for IsotopeLabel {
    type Err = UnsupportedIsotope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "13C" => Ok(Self::C13),
            "2H" => Ok(Self::H2),
            "15N" => Ok(Self::N15),
            _ => Err(UnsupportedIsotope(s.to_string())),
        }
    }
}

impl Display for IsotopeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("13C".parse::<IsotopeLabel>().unwrap(), IsotopeLabel::C13);
        assert_eq!("2H".parse::<IsotopeLabel>().unwrap(), IsotopeLabel::H2);
        assert_eq!("15N".parse::<IsotopeLabel>().unwrap(), IsotopeLabel::N15);
        assert_eq!(
            "18O".parse::<IsotopeLabel>(),
            Err(UnsupportedIsotope("18O".to_string()))
        );
        assert!(IsotopeLabel::is_supported("13C"));
        assert!(!IsotopeLabel::is_supported("C13"));
        for label in IsotopeLabel::ALL {
            assert_eq!(label.to_string().parse::<IsotopeLabel>().unwrap(), label);
        }
    }

    #[test]
    fn test_maximum() {
        let formula = "C17H27N3O17P2";
        assert_eq!(IsotopeLabel::C13.maximum(formula), 17);
        assert_eq!(IsotopeLabel::H2.maximum(formula), 27);
        assert_eq!(IsotopeLabel::N15.maximum(formula), 3);
        assert_eq!(IsotopeLabel::N15.maximum("C6H12O6"), 0);
        assert_eq!(IsotopeLabel::C13.maximum("c4h8"), 4);
        assert_eq!(IsotopeLabel::C13.maximum(""), 0);
    }

    #[test]
    fn test_properties() {
        assert_eq!(IsotopeLabel::C13.element(), "Carbon");
        assert_eq!(IsotopeLabel::H2.name(), "Deuterium");
        assert_eq!(IsotopeLabel::N15.element_symbol(), "N");
        assert!((IsotopeLabel::C13.natural_abundance() - 0.01109).abs() < 1e-12);
    }
}
