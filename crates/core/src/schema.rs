use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value as JsonValue};

use crate::coerce::TextFallback;
use crate::header::{normalize_header, HeaderMatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text(TextFallback),
    /// Counts and years; fractional input is truncated toward zero.
    Integer,
    /// Currency-like and measured quantities.
    Number,
    /// Yes/no practices.
    Flag,
}

impl FieldKind {
    pub fn json_type(&self) -> &'static str {
        match self {
            FieldKind::Text(_) => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Flag => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

const fn identity(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text(TextFallback::Blank),
        description,
    }
}

const fn category(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text(TextFallback::NotAvailable),
        description,
    }
}

const fn integer(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Integer,
        description,
    }
}

const fn number(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Number,
        description,
    }
}

const fn flag(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Flag,
        description,
    }
}

/// A fixed target record shape plus the alias table that feeds it.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    fields: Vec<FieldSpec>,
    aliases: HashMap<String, &'static str>,
}

impl Schema {
    /// Every field also answers to its own normalized name.
    pub fn new(
        name: &'static str,
        fields: Vec<FieldSpec>,
        aliases: &[(&str, &'static str)],
    ) -> Self {
        let mut table = HashMap::new();
        for field in &fields {
            table.insert(normalize_header(field.name), field.name);
        }
        for (alias, target) in aliases {
            if fields.iter().any(|f| f.name == *target) {
                table.insert(normalize_header(alias), *target);
            } else {
                tracing::warn!(alias = *alias, target = *target, "alias targets unknown field");
            }
        }
        Self {
            name,
            fields,
            aliases: table,
        }
    }

    pub fn household() -> &'static Schema {
        &HOUSEHOLD
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Looks up an already-normalized header token.
    pub fn map_header(&self, normalized: &str) -> HeaderMatch {
        match self.aliases.get(normalized) {
            Some(field) => HeaderMatch::Canonical(*field),
            None => HeaderMatch::Raw(normalized.to_string()),
        }
    }

    /// JSON schema (array of objects) handed to the canonical oracle variant.
    pub fn json_schema(&self) -> JsonValue {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.to_string(),
                json!({
                    "type": field.kind.json_type(),
                    "description": field.description,
                }),
            );
        }
        let required: Vec<&str> = self.fields.iter().map(|f| f.name).collect();
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

static HOUSEHOLD: Lazy<Schema> =
    Lazy::new(|| Schema::new("household", HOUSEHOLD_FIELDS.to_vec(), HOUSEHOLD_ALIASES));

const HOUSEHOLD_FIELDS: &[FieldSpec] = &[
    identity("unitName", "Name of the unit"),
    identity("name", "Name of the resident"),
    identity("location", "Location of the residence"),
    integer("familyMembers", "Number of family members"),
    category("houseType", "Type of house (e.g. Owned, Rented)"),
    category("houseStructure", "House structure (e.g. 2BHK)"),
    number("totalFloorArea", "Total floor area in sq. ft."),
    integer("yearOfConstruction", "Year the house was built"),
    number("avgMonthlyBill", "Average monthly electricity bill"),
    number("avgMonthlyWaterBill", "Average monthly water bill"),
    number("avgMonthlyVehicleCost", "Average monthly vehicle running cost"),
    flag("useWindowFilms", "Whether reflective window films are used"),
    flag("hasEnergyEfficientAppliances", "Whether BEE star rated appliances are owned"),
    flag("unplugDevicesWhenNotinUse", "Whether devices are unplugged when not in use"),
    flag("usePowerStrip", "Whether a power strip is used for multiple devices"),
    flag("cleanRefrigeratorCoils", "Whether refrigerator coils are cleaned regularly"),
    flag("hasSolarPanels", "Whether solar panels are installed"),
    category("cookingFuel", "Primary fuel used for cooking"),
    category("consumerNumber", "Electricity consumer number"),
    category("connectionType", "Electricity connection type (single or three phase)"),
    category("waterSource", "Source of water"),
    number("solarPanelCapacity", "Installed solar capacity in kW"),
    category("energyEfficientAppliancesDetails", "Which energy efficient appliances are owned"),
    flag("switchOffWhenNotInUse", "Whether lights and fans are switched off when not in use"),
    flag("useDaylight", "Whether daylight is used instead of artificial light"),
    category("waterHeatingMethod", "How water is heated"),
    flag("useBucketBathing", "Whether a bucket is used for bathing"),
    flag("fixLeakingTaps", "Whether leaking taps are checked and fixed regularly"),
    flag("washClothesInColdWater", "Whether clothes are washed in cold water"),
    category("clothesDryingMethod", "How clothes are dried"),
    category("ironingFrequency", "How often clothes are ironed"),
    flag("awareOfSolarSubsidy", "Whether the household knows about solar subsidies"),
    flag("preferEnergySavingAppliances", "Whether energy saving appliances are preferred"),
    category("biggestElectricityConcern", "Biggest concern about electricity"),
    flag("interestedInEnergyTips", "Whether the household wants energy saving tips"),
    category("additionalComments", "Free-form comments"),
    number("lpgCylindersPerMonth", "LPG cylinders used per month"),
    number("cookingElectricityKwhPerMonth", "Electricity used for cooking in kWh per month"),
    category("otherCookingFuels", "Other fuels used for cooking"),
    category("cookingAppliances", "Cooking appliances in use"),
    number("cookingTimeBreakfastHours", "Hours spent cooking breakfast"),
    number("cookingTimeLunchHours", "Hours spent cooking lunch"),
    number("cookingTimeDinnerHours", "Hours spent cooking dinner"),
    integer("numTwoWheelers", "Number of two wheelers"),
    integer("numCars", "Number of cars"),
    integer("numElectricVehicles", "Number of electric vehicles"),
    category("vehicleFuelType", "Fuel type used by vehicles"),
    number("twoWheelerFuelConsumptionLiters", "Monthly two wheeler fuel in liters"),
    number("carFuelConsumptionLiters", "Monthly car fuel in liters"),
    number("twoWheelerDistanceKm", "Monthly two wheeler distance in km"),
    number("carDistanceKm", "Monthly car distance in km"),
];

// Survey questions arrive as long-form headers; OCR frequently reads "No-2" as "N0-2".
const HOUSEHOLD_ALIASES: &[(&str, &str)] = &[
    ("numberoffamilymembers", "familyMembers"),
    ("familysize", "familyMembers"),
    ("totalfloorareasqft", "totalFloorArea"),
    ("totalfloorareasqftmifknown", "totalFloorArea"),
    ("floorarea", "totalFloorArea"),
    ("constructionyear", "yearOfConstruction"),
    ("yearbuilt", "yearOfConstruction"),
    ("averagemonthlyelectricitybill", "avgMonthlyBill"),
    ("whatisyouraveragemonthlyelectricitybillinrupees", "avgMonthlyBill"),
    ("monthlybill", "avgMonthlyBill"),
    ("electricitybill", "avgMonthlyBill"),
    ("averagemonthlywaterbill", "avgMonthlyWaterBill"),
    ("monthlywaterbill", "avgMonthlyWaterBill"),
    ("waterbill", "avgMonthlyWaterBill"),
    ("averagemonthlyvehiclecost", "avgMonthlyVehicleCost"),
    ("monthlyvehiclecost", "avgMonthlyVehicleCost"),
    ("vehiclecost", "avgMonthlyVehicleCost"),
    ("doyouusereflectivewindowfilmstoreduceheat", "useWindowFilms"),
    ("reflectivewindowfilms", "useWindowFilms"),
    ("doyouhaveenergyefficientbeestarappliancessyes1no2", "hasEnergyEfficientAppliances"),
    ("doyouhaveenergyefficientbeestarappliancessyes1n02", "hasEnergyEfficientAppliances"),
    ("energyefficientappliances", "hasEnergyEfficientAppliances"),
    ("doyouhaveenergysavingappliances", "hasEnergyEfficientAppliances"),
    ("doyouunplugdeviceswhennotinuseyes1no2", "unplugDevicesWhenNotinUse"),
    ("doyouunplugdeviceswhennotinuseyes1n02", "unplugDevicesWhenNotinUse"),
    ("doyouswitchofflightsfanswhennotinuseyes1no2", "switchOffWhenNotInUse"),
    ("doyouswitchofflightsfanswhennotinuse", "switchOffWhenNotInUse"),
    ("switchofflightsfans", "switchOffWhenNotInUse"),
    ("doyouuseapowerstripformultipledevices", "usePowerStrip"),
    ("powerstrip", "usePowerStrip"),
    ("doyoucleanrefrigeratorcoilsandfansregularlytoimproveefficiency", "cleanRefrigeratorCoils"),
    ("cleanfridgecoils", "cleanRefrigeratorCoils"),
    ("doyouhavesolarpanelsinstalled", "hasSolarPanels"),
    ("solarpanels", "hasSolarPanels"),
    ("solarpanelinstalled", "hasSolarPanels"),
    ("whatallfuelsareusedforcookingplprovidetheirusagetime", "cookingFuel"),
    ("whatallfuelsareusedforcooking", "cookingFuel"),
    ("fuelusedforcooking", "cookingFuel"),
    ("fuelsforcooking", "cookingFuel"),
    ("consumernumber", "consumerNumber"),
    ("consumerno", "consumerNumber"),
    ("typeofconnection", "connectionType"),
    ("typeofconnection1single2three", "connectionType"),
    ("sourceofwater", "waterSource"),
    ("solarcapacity", "solarPanelCapacity"),
    ("solarpanelcapacitykw", "solarPanelCapacity"),
    ("detailsofenergyefficientappliances", "energyEfficientAppliancesDetails"),
    ("doyouusedaylightinsteadoflights", "useDaylight"),
    ("naturallight", "useDaylight"),
    ("methodofwaterheating", "waterHeatingMethod"),
    ("howdoyouheatwater", "waterHeatingMethod"),
    ("doyouuseabucketforbathing", "useBucketBathing"),
    ("bucketbathing", "useBucketBathing"),
    ("doyoucheckandfixleakingtapsregularlyyes1no2", "fixLeakingTaps"),
    ("doyoucheckandfixleakingtapsregularlyyes1n02", "fixLeakingTaps"),
    ("doyoucheckandfixleakingtapsregularly", "fixLeakingTaps"),
    ("doyouwashclothesincoldwateryes1no2", "washClothesInColdWater"),
    ("doyouwashclothesincoldwateryes1n02", "washClothesInColdWater"),
    ("doyouwashclothesincoldwater", "washClothesInColdWater"),
    ("howdoyoudryclothes", "clothesDryingMethod"),
    ("howoftendoyouironclothes", "ironingFrequency"),
    ("areyouawareofsolarsubsidy", "awareOfSolarSubsidy"),
    ("areyouawareofgovernmentsubsidiesforsolarpanels", "awareOfSolarSubsidy"),
    ("doyoupreferenergysavingappliances", "preferEnergySavingAppliances"),
    ("whatisyourbiggestconcernaboutelectricity", "biggestElectricityConcern"),
    ("wouldyoubeinterestedinenergysavingtips", "interestedInEnergyTips"),
    ("comments", "additionalComments"),
    ("remarks", "additionalComments"),
    ("noofgascylinderspermonth", "lpgCylindersPerMonth"),
    ("lpgcylinders", "lpgCylindersPerMonth"),
    ("othercookingfuel", "otherCookingFuels"),
    ("breakfastcookingtime", "cookingTimeBreakfastHours"),
    ("lunchcookingtime", "cookingTimeLunchHours"),
    ("dinnercookingtime", "cookingTimeDinnerHours"),
    ("numberoftwowheelers", "numTwoWheelers"),
    ("twowheelers", "numTwoWheelers"),
    ("numberofcars", "numCars"),
    ("numberofelectricvehicles", "numElectricVehicles"),
    ("electricvehicles", "numElectricVehicles"),
    ("fueltype", "vehicleFuelType"),
    ("twowheelerfuelconsumption", "twoWheelerFuelConsumptionLiters"),
    ("carfuelconsumption", "carFuelConsumptionLiters"),
    ("twowheelerdistance", "twoWheelerDistanceKm"),
    ("cardistance", "carDistanceKm"),
];
