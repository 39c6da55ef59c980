use super::*;

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Sampler {
    #[serde(default)]
    enabled: Option<bool>,
}

impl Sampler {
    pub fn enabled(&self) -> Option<bool> {
        self.enabled
    }
}
