mod entities;
mod relationships;

pub use entities::map_query_to_entities;
pub use relationships::{
    in_network_relationships, out_network_relationships, rank_relationships,
    select_relationships,
};
