use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Owner ID
    pub exp: usize,
    pub iat: usize,
}
