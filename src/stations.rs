use crate::config::QualityConfig;
use crate::error::Result;
use crate::product::{Product, ProductState, ProductType};
use crate::station::{ProcessOutcome, StationCore, StationLogic};
use std::time::Duration;

pub const INTAKE: &str = "Intake";
pub const ASSEMBLER: &str = "Assembler";
pub const QUALITY_INSPECTION: &str = "Quality Inspection";
pub const PACKAGING: &str = "Packaging";
pub const SHIPPING: &str = "Shipping";

/// Admits newly synthesized products into the line.
pub struct IntakeLogic;

impl StationLogic for IntakeLogic {
    fn process(&mut self, product: &mut Product, station: &StationCore) -> Result<ProcessOutcome> {
        if station.should_reject() {
            station.log_info(format!("Intake check failed for product {}", product.id()));
            return Ok(ProcessOutcome::Reject);
        }
        station.simulate_work(station.processing_delay());

        product.set_state(ProductState::AtIntake);
        product.add_trace_entry(station.name());
        product.advance();
        station.log_debug(format!(
            "Admitted product {} ({})",
            product.id(),
            product.product_type().label()
        ));
        Ok(ProcessOutcome::Forward)
    }
}

fn assembly_steps(product_type: ProductType) -> [&'static str; 4] {
    match product_type {
        ProductType::Washer => [
            "Install drum",
            "Connect motor",
            "Install control panel",
            "Add door seal",
        ],
        ProductType::Dryer => [
            "Install heating element",
            "Connect ventilation",
            "Install control panel",
            "Add lint filter",
        ],
        ProductType::Refrigerator => [
            "Install compressor",
            "Add insulation",
            "Install shelves",
            "Connect cooling system",
        ],
        ProductType::Dishwasher => [
            "Install spray arms",
            "Connect pump",
            "Install control panel",
            "Add door seals",
        ],
        ProductType::Oven => [
            "Install heating elements",
            "Add insulation",
            "Install control panel",
            "Connect gas/electric",
        ],
    }
}

/// Performs the per-type assembly steps, distributing the drawn processing
/// time across them.
pub struct AssemblerLogic;

impl StationLogic for AssemblerLogic {
    fn process(&mut self, product: &mut Product, station: &StationCore) -> Result<ProcessOutcome> {
        if station.should_reject() {
            station.log_info(format!("Assembly failed for product {}", product.id()));
            return Ok(ProcessOutcome::Reject);
        }

        let steps = assembly_steps(product.product_type());
        let slice = station.processing_delay() / steps.len() as u32;
        for step in steps {
            station.log_debug(format!("{} for product {}", step, product.id()));
            station.simulate_work(slice);
        }

        product.set_state(ProductState::AtAssembler);
        product.add_trace_entry(station.name());
        product.advance();
        Ok(ProcessOutcome::Forward)
    }
}

fn sub_tests(product_type: ProductType) -> [&'static str; 4] {
    match product_type {
        ProductType::Washer => [
            "Water seal test",
            "Motor function test",
            "Control panel test",
            "Drum alignment test",
        ],
        ProductType::Dryer => [
            "Heating test",
            "Ventilation test",
            "Control panel test",
            "Safety interlock test",
        ],
        ProductType::Refrigerator => [
            "Cooling test",
            "Insulation test",
            "Door seal test",
            "Temperature control test",
        ],
        ProductType::Dishwasher => [
            "Water pressure test",
            "Spray pattern test",
            "Control panel test",
            "Drainage test",
        ],
        ProductType::Oven => [
            "Heating uniformity test",
            "Insulation test",
            "Control panel test",
            "Safety test",
        ],
    }
}

/// Runs the per-type sub-tests and decides between pass, rework and reject.
pub struct QualityInspectionLogic {
    rework_rate: f64,
    sub_test_pass_rate: f64,
    max_rework_count: Option<u32>,
}

impl QualityInspectionLogic {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            rework_rate: config.rework_rate,
            sub_test_pass_rate: config.sub_test_pass_rate,
            max_rework_count: config.max_rework_count,
        }
    }
}

impl StationLogic for QualityInspectionLogic {
    fn process(&mut self, product: &mut Product, station: &StationCore) -> Result<ProcessOutcome> {
        if station.should_reject() {
            station.log_info(format!(
                "Product {} failed quality inspection, rejected",
                product.id()
            ));
            return Ok(ProcessOutcome::Reject);
        }

        station.simulate_work(station.processing_delay());

        let mut failed = 0usize;
        for test in sub_tests(product.product_type()) {
            if !station.rng().chance(self.sub_test_pass_rate) {
                failed += 1;
                station.log_debug(format!("{} FAILED for product {}", test, product.id()));
            }
            station.simulate_work(Duration::from_millis(10));
        }

        let needs_rework =
            failed > 1 || (failed == 1 && station.rng().chance(self.rework_rate));
        if needs_rework {
            let inspections = product.visits(station.name()) + 1;
            product.add_trace_entry(station.name());
            if let Some(cap) = self.max_rework_count {
                if inspections >= cap as usize {
                    station.log_info(format!(
                        "Product {} exceeded {} rework passes, rejected",
                        product.id(),
                        cap
                    ));
                    return Ok(ProcessOutcome::Reject);
                }
            }
            // The rework flag is consumed by the back-edge of advance().
            product.set_rework(true);
            product.set_state(ProductState::AtQualityInspection);
            product.advance();
            station.log_info(format!("Product {} requires rework", product.id()));
            return Ok(ProcessOutcome::Rework);
        }

        product.set_state(ProductState::AtQualityInspection);
        product.add_trace_entry(station.name());
        product.advance();
        station.log_debug(format!(
            "Product {} passed quality inspection ({}/4 sub-tests)",
            product.id(),
            4 - failed
        ));
        Ok(ProcessOutcome::Forward)
    }
}

struct PackageSpec {
    box_type: &'static str,
    estimated_weight_kg: u32,
}

fn package_spec(product_type: ProductType) -> PackageSpec {
    match product_type {
        ProductType::Washer => PackageSpec {
            box_type: "Heavy-duty cardboard box with foam inserts",
            estimated_weight_kg: 75,
        },
        ProductType::Dryer => PackageSpec {
            box_type: "Standard appliance box with corner protection",
            estimated_weight_kg: 68,
        },
        ProductType::Refrigerator => PackageSpec {
            box_type: "Extra-large appliance box with strapping",
            estimated_weight_kg: 125,
        },
        ProductType::Dishwasher => PackageSpec {
            box_type: "Medium appliance box with protective wrap",
            estimated_weight_kg: 58,
        },
        ProductType::Oven => PackageSpec {
            box_type: "Reinforced appliance box with thermal protection",
            estimated_weight_kg: 82,
        },
    }
}

const PACKAGING_STEPS: [&str; 5] = [
    "Prepare packaging materials",
    "Place product in protective materials",
    "Add accessories and documentation",
    "Seal and label package",
    "Quality check package integrity",
];

/// Boxes the product according to its package spec.
pub struct PackagingLogic;

impl StationLogic for PackagingLogic {
    fn process(&mut self, product: &mut Product, station: &StationCore) -> Result<ProcessOutcome> {
        if station.should_reject() {
            station.log_info(format!(
                "Product {} damaged during packaging, rejected",
                product.id()
            ));
            return Ok(ProcessOutcome::Reject);
        }

        let spec = package_spec(product.product_type());
        station.log_debug(format!("Packaging product {} in {}", product.id(), spec.box_type));
        let slice = station.processing_delay() / PACKAGING_STEPS.len() as u32;
        for step in PACKAGING_STEPS {
            station.log_debug(format!("{} for product {}", step, product.id()));
            station.simulate_work(slice);
        }

        product.set_state(ProductState::AtPackaging);
        product.add_trace_entry(station.name());
        product.advance();
        station.log_debug(format!(
            "Packaged product {} (estimated weight {} kg)",
            product.id(),
            spec.estimated_weight_kg
        ));
        Ok(ProcessOutcome::Forward)
    }
}

const DESTINATIONS: [&str; 10] = [
    "New York",
    "Los Angeles",
    "Chicago",
    "Houston",
    "Phoenix",
    "Philadelphia",
    "San Antonio",
    "San Diego",
    "Dallas",
    "San Jose",
];

const SHIPPING_METHODS: [&str; 4] = ["Standard Ground", "Express", "Next Day Air", "Freight"];

/// Prepares the shipment and terminates the product's journey.
pub struct ShippingLogic;

impl ShippingLogic {
    fn tracking_number(station: &StationCore) -> String {
        format!(
            "1Z{}{:08X}",
            station.rng().range_u32(100_000, 1_000_000),
            station.rng().range_u32(0, u32::MAX)
        )
    }

    fn delivery_days(station: &StationCore, method: &str) -> u32 {
        match method {
            "Next Day Air" => 1,
            "Express" => 2 + station.rng().range_u32(0, 2),
            "Standard Ground" => 5 + station.rng().range_u32(0, 3),
            _ => 7 + station.rng().range_u32(0, 7),
        }
    }
}

impl StationLogic for ShippingLogic {
    fn process(&mut self, product: &mut Product, station: &StationCore) -> Result<ProcessOutcome> {
        if station.should_reject() {
            station.log_info(format!(
                "Shipping preparation failed for product {}, rejected",
                product.id()
            ));
            return Ok(ProcessOutcome::Reject);
        }

        // Freight for the heavy ones, anything for the rest.
        let method = if product.product_type() == ProductType::Refrigerator {
            "Freight"
        } else {
            SHIPPING_METHODS[station.rng().index(SHIPPING_METHODS.len())]
        };
        let destination = DESTINATIONS[station.rng().index(DESTINATIONS.len())];
        let tracking = Self::tracking_number(station);
        let eta_days = Self::delivery_days(station, method);

        let slice = station.processing_delay() / 4;
        station.simulate_work(slice);
        station.log_debug(format!("Generated shipping label for product {}", product.id()));
        station.simulate_work(slice);
        station.log_debug(format!("Product {} loaded for {} shipping", product.id(), method));
        station.simulate_work(slice);
        station.log_debug(format!(
            "Tracking number {} assigned to product {}",
            tracking,
            product.id()
        ));
        station.simulate_work(slice);

        product.set_state(ProductState::AtShipping);
        product.add_trace_entry(station.name());
        product.advance();
        station.log_info(format!(
            "Product {} dispatched to {} via {} (tracking {}, ETA {} days)",
            product.id(),
            destination,
            method,
            tracking,
            eta_days
        ));
        Ok(ProcessOutcome::Forward)
    }
}
