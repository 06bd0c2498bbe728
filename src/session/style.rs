use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Directive appended to the user's text before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    #[default]
    None,
    Detailed,
    Concise,
    Creative,
}

impl ResponseStyle {
    pub const ALL: [ResponseStyle; 4] = [
        ResponseStyle::None,
        ResponseStyle::Detailed,
        ResponseStyle::Concise,
        ResponseStyle::Creative,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            ResponseStyle::None => "",
            ResponseStyle::Detailed => " Please provide a detailed response.",
            ResponseStyle::Concise => " Keep the response concise.",
            ResponseStyle::Creative => " Provide a creative response.",
        }
    }

    /// Trims `text` and appends the directive. Pure text transform.
    pub fn apply(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return self.suffix().trim_start().to_string();
        }
        format!("{}{}", text, self.suffix())
    }
}

impl fmt::Display for ResponseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseStyle::None => "none",
            ResponseStyle::Detailed => "detailed",
            ResponseStyle::Concise => "concise",
            ResponseStyle::Creative => "creative",
        };
        f.write_str(name)
    }
}

impl FromStr for ResponseStyle {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(ResponseStyle::None),
            "detailed" => Ok(ResponseStyle::Detailed),
            "concise" => Ok(ResponseStyle::Concise),
            "creative" => Ok(ResponseStyle::Creative),
            _ => Err(ClientError::InvalidConfig(format!("Unknown response style: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_directive_to_trimmed_text() {
        assert_eq!(
            ResponseStyle::Concise.apply("  why is the sky blue?\n"),
            "why is the sky blue? Keep the response concise."
        );
        assert_eq!(ResponseStyle::None.apply(" hi "), "hi");
        assert_eq!(ResponseStyle::Detailed.apply(""), "Please provide a detailed response.");
    }

    #[test]
    fn round_trips_names() {
        for style in ResponseStyle::ALL {
            assert_eq!(style.to_string().parse::<ResponseStyle>().unwrap(), style);
        }
        assert!("verbose".parse::<ResponseStyle>().is_err());
    }
}
