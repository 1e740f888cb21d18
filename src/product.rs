use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of appliance the line can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProductType {
    Washer,
    Dryer,
    Refrigerator,
    Dishwasher,
    Oven,
}

impl ProductType {
    pub const ALL: [ProductType; 5] = [
        ProductType::Washer,
        ProductType::Dryer,
        ProductType::Refrigerator,
        ProductType::Dishwasher,
        ProductType::Oven,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProductType::Washer => "Washer",
            ProductType::Dryer => "Dryer",
            ProductType::Refrigerator => "Refrigerator",
            ProductType::Dishwasher => "Dishwasher",
            ProductType::Oven => "Oven",
        }
    }
}

impl From<ProductType> for u8 {
    fn from(value: ProductType) -> u8 {
        value as u8
    }
}

impl TryFrom<u8> for ProductType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ProductType::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| format!("invalid product type {value}"))
    }
}

/// Lifecycle states of a product as it moves down the line.
///
/// `Finished` and `Rejected` are terminal; `advance` never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProductState {
    Created,
    AtIntake,
    AtAssembler,
    AtQualityInspection,
    AtPackaging,
    AtShipping,
    Finished,
    Rejected,
    InRework,
}

impl ProductState {
    const ALL: [ProductState; 9] = [
        ProductState::Created,
        ProductState::AtIntake,
        ProductState::AtAssembler,
        ProductState::AtQualityInspection,
        ProductState::AtPackaging,
        ProductState::AtShipping,
        ProductState::Finished,
        ProductState::Rejected,
        ProductState::InRework,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProductState::Created => "Created",
            ProductState::AtIntake => "At Intake",
            ProductState::AtAssembler => "At Assembler",
            ProductState::AtQualityInspection => "At Quality Inspection",
            ProductState::AtPackaging => "At Packaging",
            ProductState::AtShipping => "At Shipping",
            ProductState::Finished => "Finished",
            ProductState::Rejected => "Rejected",
            ProductState::InRework => "In Rework",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProductState::Finished | ProductState::Rejected)
    }
}

impl From<ProductState> for u8 {
    fn from(value: ProductState) -> u8 {
        value as u8
    }
}

impl TryFrom<u8> for ProductState {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ProductState::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| format!("invalid product state {value}"))
    }
}

/// A discrete work item flowing through the line.
///
/// Carries a stable opaque id, its type, the current lifecycle state, an
/// append-only trace of station visits and the rework flag. Ownership moves
/// with the product: the buffer it sits in, or the station processing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Product {
    id: String,
    #[serde(rename = "type")]
    product_type: ProductType,
    current_state: ProductState,
    created_time: DateTime<Utc>,
    in_rework: bool,
    trace: Vec<String>,
}

impl Product {
    pub fn new(product_type: ProductType) -> Self {
        Self {
            id: generate_id(),
            product_type,
            current_state: ProductState::Created,
            created_time: Utc::now(),
            in_rework: false,
            trace: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn product_type(&self) -> ProductType {
        self.product_type
    }

    pub fn state(&self) -> ProductState {
        self.current_state
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn is_in_rework(&self) -> bool {
        self.in_rework
    }

    pub fn set_rework(&mut self, rework: bool) {
        self.in_rework = rework;
    }

    pub fn set_state(&mut self, state: ProductState) {
        self.current_state = state;
    }

    /// Progress one step through the lifecycle.
    ///
    /// Linear except for two back-edges: from `AtQualityInspection` with the
    /// rework flag set the product returns to `AtAssembler` and the flag is
    /// consumed; from `InRework` it also returns to `AtAssembler`. Terminal
    /// states are left untouched.
    pub fn advance(&mut self) {
        self.current_state = match self.current_state {
            ProductState::Created => ProductState::AtIntake,
            ProductState::AtIntake => ProductState::AtAssembler,
            ProductState::AtAssembler => ProductState::AtQualityInspection,
            ProductState::AtQualityInspection => {
                if self.in_rework {
                    self.in_rework = false;
                    ProductState::AtAssembler
                } else {
                    ProductState::AtPackaging
                }
            }
            ProductState::AtPackaging => ProductState::AtShipping,
            ProductState::AtShipping => ProductState::Finished,
            ProductState::InRework => ProductState::AtAssembler,
            terminal => terminal,
        };
    }

    /// Append a `"<station> at <timestamp>"` entry to the trace.
    pub fn add_trace_entry(&mut self, station: &str) {
        self.trace
            .push(format!("{} at {}", station, Utc::now().to_rfc3339()));
    }

    /// How many trace entries this station has contributed.
    pub fn visits(&self, station: &str) -> usize {
        self.trace.iter().filter(|e| e.starts_with(station)).count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn generate_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("P-{}", uuid[..8].to_uppercase())
}
