//! Manifest template: column sets and controlled vocabularies.

pub const STUDY: &str = "study";
pub const GP2ID: &str = "GP2ID";
pub const CLINICAL_ID: &str = "clinical_id";
pub const GP2_SAMPLE_ID: &str = "GP2sampleID";
pub const SAMPLE_ID: &str = "sample_id";
pub const STUDY_TYPE: &str = "study_type";
pub const GP2_PHENOTYPE: &str = "GP2_phenotype";
pub const STUDY_ARM: &str = "study_arm";
pub const DIAGNOSIS: &str = "diagnosis";
pub const FAMILY_HISTORY_FOR_QC: &str = "family_history_for_qc";
pub const MANIFEST_ID: &str = "manifest_id";
pub const SAMPLE_REP_NO: &str = "SampleRepNo";
pub const FILENAME: &str = "filename";

pub const BASE_COLUMNS: &[&str] = &[
    STUDY,
    GP2ID,
    CLINICAL_ID,
    GP2_SAMPLE_ID,
    SAMPLE_ID,
    STUDY_TYPE,
    GP2_PHENOTYPE,
];

pub const REQUIRED_COLUMNS: &[&str] = &[
    STUDY,
    GP2ID,
    CLINICAL_ID,
    GP2_SAMPLE_ID,
    SAMPLE_ID,
    STUDY_TYPE,
    GP2_PHENOTYPE,
    STUDY_ARM,
    DIAGNOSIS,
    "biological_sex_for_qc",
    "race_for_qc",
    FAMILY_HISTORY_FOR_QC,
    "region_for_qc",
    MANIFEST_ID,
    SAMPLE_REP_NO,
    "Genotyping_site",
];

pub const OPTIONAL_COLUMNS: &[&str] = &[
    "family_index",
    "family_index_relationship",
    "sample_type",
    "DNA_volume",
    "DNA_conc",
    "r260_280",
    "Plate_name",
    "Plate_position",
    "race",
    "sex",
    "age",
    "age_of_onset",
    "age_at_diagnosis",
    "age_at_death",
    "age_at_last_follow_up",
    "family_history_pd",
    "family_history_other",
    "family_history_details",
    "region",
    "comment",
    "alternative_id1",
    "alternative_id2",
    "GP2_phenotype_for_qc",
    FILENAME,
];

pub const AGE_COLUMNS: &[&str] = &[
    "age",
    "age_of_onset",
    "age_at_diagnosis",
    "age_at_death",
    "age_at_last_follow_up",
];

/// Columns from older template revisions, dropped when manifests are combined.
pub const RETIRED_COLUMNS: &[&str] = &[
    "GP2_PHENO",
    "GP2_family_id",
    "alternative_id3",
    "alternative_id4",
];

/// Columns compared across replicates when no list is configured.
pub const DEFAULT_MONITORED_COLUMNS: &[&str] = &[
    CLINICAL_ID,
    STUDY_ARM,
    DIAGNOSIS,
    GP2_PHENOTYPE,
    "biological_sex_for_qc",
    "race_for_qc",
    FAMILY_HISTORY_FOR_QC,
    "region_for_qc",
];

/// Required columns followed by optional ones; the closed template.
pub fn all_columns() -> impl Iterator<Item = &'static str> {
    REQUIRED_COLUMNS.iter().chain(OPTIONAL_COLUMNS).copied()
}

/// How values of a controlled column are checked.
#[derive(Debug, Clone, Copy)]
pub enum Vocabulary {
    Values(&'static [&'static str]),
    /// `{prefix}1` .. `{prefix}99`
    Numbered(char),
}

impl Vocabulary {
    pub fn allows(&self, value: &str) -> bool {
        match self {
            Vocabulary::Values(values) => values.contains(&value),
            Vocabulary::Numbered(prefix) => value
                .strip_prefix(*prefix)
                .filter(|digits| !digits.starts_with('0'))
                .and_then(|digits| digits.parse::<u32>().ok())
                .is_some_and(|n| (1..=99).contains(&n)),
        }
    }
}

pub const PHENOTYPES: &[&str] = &[
    "PD",
    "Control",
    "Prodromal",
    "PSP",
    "CBD/CBS",
    "MSA",
    "DLB",
    "LBD",
    "AD",
    "FTD",
    "VaD",
    "VaPD",
    "Population Control",
    "Undetermined-MCI",
    "Undetermined-Dementia",
    "Mix",
    "Other",
];

pub const STUDY_TYPES: &[&str] = &[
    "Case(/Control)",
    "Prodromal",
    "Genetically Enriched",
    "Population Cohort",
    "Brain Bank",
    "Monogenic",
];

pub const SEXES: &[&str] = &["Male", "Female", "Other/Unknown/Not Reported"];

pub const RACES: &[&str] = &[
    "American Indian or Alaska Native",
    "Asian",
    "White",
    "Black or African American",
    "Multi-racial",
    "Native Hawaiian or Other Pacific Islander",
    "Other",
    "Unknown",
    "Not Reported",
];

pub const FAMILY_HISTORY: &[&str] = &["Yes", "No", "Not Reported", "Unknown"];

/// ISO 3166-1 alpha-3 codes.
pub const REGION_CODES: &[&str] = &[
    "ABW", "AFG", "AGO", "AIA", "ALA", "ALB", "AND", "ARE", "ARG", "ARM", "ASM", "ATA",
    "ATF", "ATG", "AUS", "AUT", "AZE", "BDI", "BEL", "BEN", "BES", "BFA", "BGD", "BGR",
    "BHR", "BHS", "BIH", "BLM", "BLR", "BLZ", "BMU", "BOL", "BRA", "BRB", "BRN", "BTN",
    "BVT", "BWA", "CAF", "CAN", "CCK", "CHE", "CHL", "CHN", "CIV", "CMR", "COD", "COG",
    "COK", "COL", "COM", "CPV", "CRI", "CUB", "CUW", "CXR", "CYM", "CYP", "CZE", "DEU",
    "DJI", "DMA", "DNK", "DOM", "DZA", "ECU", "EGY", "ERI", "ESH", "ESP", "EST", "ETH",
    "FIN", "FJI", "FLK", "FRA", "FRO", "FSM", "GAB", "GBR", "GEO", "GGY", "GHA", "GIB",
    "GIN", "GLP", "GMB", "GNB", "GNQ", "GRC", "GRD", "GRL", "GTM", "GUF", "GUM", "GUY",
    "HKG", "HMD", "HND", "HRV", "HTI", "HUN", "IDN", "IMN", "IND", "IOT", "IRL", "IRN",
    "IRQ", "ISL", "ISR", "ITA", "JAM", "JEY", "JOR", "JPN", "KAZ", "KEN", "KGZ", "KHM",
    "KIR", "KNA", "KOR", "KWT", "LAO", "LBN", "LBR", "LBY", "LCA", "LIE", "LKA", "LSO",
    "LTU", "LUX", "LVA", "MAC", "MAF", "MAR", "MCO", "MDA", "MDG", "MDV", "MEX", "MHL",
    "MKD", "MLI", "MLT", "MMR", "MNE", "MNG", "MNP", "MOZ", "MRT", "MSR", "MTQ", "MUS",
    "MWI", "MYS", "MYT", "NAM", "NCL", "NER", "NFK", "NGA", "NIC", "NIU", "NLD", "NOR",
    "NPL", "NRU", "NZL", "OMN", "PAK", "PAN", "PCN", "PER", "PHL", "PLW", "PNG", "POL",
    "PRI", "PRK", "PRT", "PRY", "PSE", "PYF", "QAT", "REU", "ROU", "RUS", "RWA", "SAU",
    "SDN", "SEN", "SGP", "SGS", "SHN", "SJM", "SLB", "SLE", "SLV", "SMR", "SOM", "SPM",
    "SRB", "SSD", "STP", "SUR", "SVK", "SVN", "SWE", "SWZ", "SXM", "SYC", "SYR", "TCA",
    "TCD", "TGO", "THA", "TJK", "TKL", "TKM", "TLS", "TON", "TTO", "TUN", "TUR", "TUV",
    "TWN", "TZA", "UGA", "UKR", "UMI", "URY", "USA", "UZB", "VAT", "VCT", "VEN", "VGB",
    "VIR", "VNM", "VUT", "WLF", "WSM", "YEM", "ZAF", "ZMB", "ZWE",
];

pub const CONTROLLED_COLUMNS: &[(&str, Vocabulary)] = &[
    (GP2_PHENOTYPE, Vocabulary::Values(PHENOTYPES)),
    (STUDY_TYPE, Vocabulary::Values(STUDY_TYPES)),
    ("biological_sex_for_qc", Vocabulary::Values(SEXES)),
    ("race_for_qc", Vocabulary::Values(RACES)),
    (FAMILY_HISTORY_FOR_QC, Vocabulary::Values(FAMILY_HISTORY)),
    ("region_for_qc", Vocabulary::Values(REGION_CODES)),
    (MANIFEST_ID, Vocabulary::Numbered('m')),
    (SAMPLE_REP_NO, Vocabulary::Numbered('s')),
];
