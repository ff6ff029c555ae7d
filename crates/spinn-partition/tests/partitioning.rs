//! Partitioning properties over whole populations.

use spinn_chip::PopulationRegion;
use spinn_partition::{
    AtomSlice, Connector, CoreLimits, NeuronModel, PartitionConstraint, PartitionError,
    Population, Projection, Recordable, RecordingConfig, SimulationParameters, SliceCostEstimator,
    StdpParameters, SynapseDynamics, VertexSplitter,
};
use std::sync::Arc;

fn linear_population() -> Population {
    Population::new("linear", 600, NeuronModel::izhikevich())
        .with_projection(Projection::new("a2a", 400, Connector::AllToAll))
        .with_projection(
            Projection::new("o2o", 600, Connector::OneToOne)
                .with_synapse_type(1)
                .with_generate_on_chip(false),
        )
        .with_synapse_dynamics(SynapseDynamics::Structural {
            stdp: StdpParameters::default(),
            s_max: 16,
        })
        .with_recording(RecordingConfig {
            neuron: vec![Recordable::state("v")],
            synapse: vec![],
        })
        .with_profile_samples(100)
}

fn slice(lo: u32, hi: u32) -> AtomSlice {
    AtomSlice::new(lo, hi).unwrap()
}

#[test]
fn split_costs_differ_from_whole_by_a_constant() {
    let mut est = SliceCostEstimator::new(Arc::new(linear_population()), SimulationParameters::default());
    let whole = est.cost(slice(0, 600));

    let mut overlap = None;
    for b in [1, 150, 299, 599] {
        let left = est.cost(slice(0, b));
        let right = est.cost(slice(b, 600));
        let sum = &left + &right;

        let extra = (
            sum.sdram.fixed() - whole.sdram.fixed(),
            sum.sdram.per_timestep() - whole.sdram.per_timestep(),
            sum.dtcm_bytes - whole.dtcm_bytes,
            sum.cpu_cycles - whole.cpu_cycles,
        );
        match overlap {
            None => overlap = Some(extra),
            Some(expected) => assert_eq!(extra, expected, "split at {b}"),
        }
    }
}

#[test]
fn singleton_regions_are_identical_for_every_slice() {
    let mut est = SliceCostEstimator::new(Arc::new(linear_population()), SimulationParameters::default());
    let small = est.cost(slice(0, 1));
    let large = est.cost(slice(0, 600));
    for region in [
        PopulationRegion::PopTable,
        PopulationRegion::ConnectorBuilder,
        PopulationRegion::BitFieldFilter,
        PopulationRegion::BitFieldKeyMap,
        PopulationRegion::BitFieldBuilder,
        PopulationRegion::DirectMatrix,
    ] {
        assert_eq!(small.sdram.region(region), large.sdram.region(region), "{}", region.name());
    }
    assert_eq!(est.stats().connection_builder_builds, 1);
    assert_eq!(est.stats().bitfield_builds, 1);
}

#[test]
fn split_partitions_population_exactly() {
    let pop = Population::new("big", 10_000, NeuronModel::lif_curr_exp())
        .with_projection(Projection::new("noise", 5000, Connector::FixedProbability { probability: 0.05 }));
    let sim = SimulationParameters::default();
    let mut splitter = VertexSplitter::new(Arc::new(pop), sim);
    let limits = CoreLimits::for_simulation(&sim);
    let vertices = splitter.split(&limits).unwrap();

    let mut expected_lo = 0;
    for (i, vertex) in vertices.iter().enumerate() {
        assert_eq!(vertex.index(), i);
        assert_eq!(vertex.slice().lo(), expected_lo);
        assert!(vertex.resources().fits(&limits, sim.n_timesteps));
        expected_lo = vertex.slice().hi();
    }
    assert_eq!(expected_lo, 10_000);
}

#[test]
fn unsupported_constraint_fails_before_costing() {
    let mut splitter = VertexSplitter::new(Arc::new(linear_population()), SimulationParameters::default())
        .with_constraint(PartitionConstraint::ChipAndCore { x: 0, y: 0, p: None });
    let err = splitter.split(&CoreLimits::default()).unwrap_err();
    assert!(matches!(err, PartitionError::UnsupportedConstraint { ref vertex, .. } if vertex == "linear"));
    assert_eq!(splitter.cache_stats().container_builds, 0);
    assert!(err.to_string().contains("ChipAndCore(0, 0)"));
}

#[test]
fn vertices_record_generatable_area() {
    let mut splitter = VertexSplitter::new(Arc::new(linear_population()), SimulationParameters::default())
        .with_constraint(PartitionConstraint::MaxAtomsPerCore(200));
    let mut vertices = splitter.split(&CoreLimits::default()).unwrap();
    assert_eq!(vertices.len(), 3);
    assert!(vertices.iter().all(|v| v.bit_field_capable()));

    let v = &mut vertices[0];
    assert_eq!(v.on_chip_generatable_area(), None);
    let size = u32::try_from(v.all_syn_block_size()).unwrap();
    v.set_on_chip_generatable_area(0, size);
    assert_eq!(v.on_chip_generatable_area().map(|a| a.size), Some(size));
    assert!(v.structural_size() > 0);
}
