use std::convert::TryFrom;

#[derive(Clone, Default)]
pub struct ConsistentHashOptions {
    /// Number of key segments. Keys hash into a segment, segments are what get owned.
    pub segments: Option<usize>,
    /// Primary plus backups per segment.
    pub owners: Option<usize>,
    /// Ring positions per member. More positions spread segments more evenly.
    pub virtual_nodes: Option<usize>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ConsistentHashOptionsValidated {
    pub segments: usize,
    pub owners: usize,
    pub virtual_nodes: usize,
}

impl ConsistentHashOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.segments == 0 {
            return Err("Consistent hash must have at least one segment");
        }
        if self.owners == 0 {
            return Err("Each segment must have at least one owner");
        }
        if self.virtual_nodes == 0 {
            return Err("Each member must have at least one position on the hash ring");
        }

        Ok(())
    }
}

impl Default for ConsistentHashOptionsValidated {
    fn default() -> Self {
        ConsistentHashOptionsValidated {
            segments: 256,
            owners: 2,
            virtual_nodes: 16,
        }
    }
}

impl TryFrom<ConsistentHashOptions> for ConsistentHashOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ConsistentHashOptions) -> Result<Self, Self::Error> {
        let defaults = ConsistentHashOptionsValidated::default();
        let values = ConsistentHashOptionsValidated {
            segments: options.segments.unwrap_or(defaults.segments),
            owners: options.owners.unwrap_or(defaults.owners),
            virtual_nodes: options.virtual_nodes.unwrap_or(defaults.virtual_nodes),
        };

        values.validate()?;
        Ok(values)
    }
}
